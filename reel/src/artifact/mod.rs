//! Artifact references and the object store boundary.
//!
//! Frames and final artifacts are addressed as `gs://bucket/name` object
//! references. [`ArtifactStore`] abstracts the store holding them; listing
//! order is never guaranteed by implementors.

use std::fmt::{self, Display};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Local filesystem artifact store.
pub mod fs;

pub use fs::FsArtifactStore;

const SCHEME: &str = "gs://";
const BUCKET_NORMAL_MAX: usize = 63;
const BUCKET_DOTS_MAX: usize = 222;
const OBJECT_NAME_MAX: usize = 1024;

/// Name of a storage bucket.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket(String);

impl Bucket {
    /// Wrap a name; see [`Bucket::is_valid`].
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference to an object inside this bucket.
    pub fn object(&self, name: impl Into<String>) -> ObjectRef {
        ObjectRef {
            bucket: self.clone(),
            name: name.into(),
        }
    }

    /// Fast, conservative bucket name check.
    ///
    /// Accepts 3..=63 characters of `[a-z0-9_-]`, or up to 222 when the
    /// name contains dots.
    pub fn is_valid(&self) -> bool {
        let mut len = 0usize;
        let mut has_dots = false;
        for c in self.0.chars() {
            len += 1;
            if len > BUCKET_DOTS_MAX {
                return false;
            }
            if c == '.' {
                has_dots = true;
                continue;
            }
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
                return false;
            }
        }
        let max = if has_dots { BUCKET_DOTS_MAX } else { BUCKET_NORMAL_MAX };
        len >= 3 && len <= max
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to one stored object.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket holding the object.
    pub bucket: Bucket,
    /// Object name, `/` separated.
    pub name: String,
}

impl ObjectRef {
    /// Parse a `gs://bucket/name` URI.
    pub fn parse(uri: &str) -> Result<Self, ArtifactError> {
        let invalid = |reason: String| ArtifactError::InvalidRef {
            uri: uri.to_string(),
            reason,
        };

        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid(format!("scheme is not {SCHEME:?}")))?;
        let (bucket, name) = rest
            .split_once('/')
            .ok_or_else(|| invalid("no object name".to_string()))?;

        let bucket = Bucket::new(bucket);
        if !bucket.is_valid() {
            return Err(invalid(format!("invalid bucket {:?}", bucket.as_str())));
        }
        let obj = bucket.object(name);
        if !obj.is_valid() {
            return Err(invalid(format!("invalid object {name:?}")));
        }
        Ok(obj)
    }

    /// Whether the object name is acceptable to the store.
    pub fn is_valid(&self) -> bool {
        if self.name.is_empty() || !self.bucket.is_valid() {
            return false;
        }
        let mut len = 0usize;
        for c in self.name.chars() {
            len += 1;
            if len > OBJECT_NAME_MAX || c == '\r' || c == '\n' || c == '\u{FFFD}' {
                return false;
            }
        }
        true
    }

    /// Final path component of the object name.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// HTTPS URL for downloading the object.
    pub fn download_url(&self) -> String {
        format!(
            "https://storage.googleapis.com/{}/{}",
            escape_path(self.bucket.as_str()),
            escape_path(&self.name)
        )
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.bucket, self.name)
    }
}

impl FromStr for ObjectRef {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// RFC 3986 unreserved characters plus the reserved set that is safe inside
// a path; only `?` among the reserved characters is escaped.
fn should_escape(b: u8) -> bool {
    if b.is_ascii_alphanumeric() {
        return false;
    }
    match b {
        b'-' | b'_' | b'.' | b'~' => false,
        b'$' | b'&' | b'+' | b',' | b'/' | b':' | b';' | b'=' | b'@' => false,
        _ => true,
    }
}

fn escape_path(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if should_escape(b) {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 15) as usize] as char);
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Object store holding frame and final artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// List objects in `bucket` whose name starts with `prefix`.
    ///
    /// The order of the returned references is unspecified.
    async fn list(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<ObjectRef>, ArtifactError>;

    /// Read an object's bytes.
    async fn get(&self, obj: &ObjectRef) -> Result<Vec<u8>, ArtifactError>;

    /// Write an object, replacing any existing one.
    async fn put(
        &self,
        obj: &ObjectRef,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError>;

    /// Grant public read access to an object.
    async fn make_public(&self, obj: &ObjectRef) -> Result<(), ArtifactError>;

    /// Location under which a public object is served.
    fn public_location(&self, obj: &ObjectRef) -> String {
        format!("{}/{}", obj.bucket, obj.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let obj = ObjectRef::parse("gs://reel-artifacts/out.1/frame_00000.png").unwrap();
        assert_eq!(obj.bucket.as_str(), "reel-artifacts");
        assert_eq!(obj.name, "out.1/frame_00000.png");
        assert_eq!(obj.file_name(), "frame_00000.png");
        assert_eq!(obj.to_string(), "gs://reel-artifacts/out.1/frame_00000.png");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(ObjectRef::parse("s3://bucket/name").is_err());
        assert!(ObjectRef::parse("gs://bucket").is_err());
        assert!(ObjectRef::parse("gs://Bucket/name").is_err());
        assert!(ObjectRef::parse("gs://ab/name").is_err());
        assert!(ObjectRef::parse("gs://bucket/").is_err());
        assert!(ObjectRef::parse("gs://bucket/line\nbreak").is_err());
    }

    #[test]
    fn test_bucket_length_limits() {
        assert!(Bucket::new("a".repeat(63)).is_valid());
        assert!(!Bucket::new("a".repeat(64)).is_valid());
        assert!(Bucket::new(format!("{}.b", "a".repeat(100))).is_valid());
        assert!(!Bucket::new(format!("{}.b", "a".repeat(221))).is_valid());
    }

    #[test]
    fn test_download_url_escapes() {
        let obj = Bucket::new("reel-artifacts").object("out 1/what?.gif");
        assert_eq!(
            obj.download_url(),
            "https://storage.googleapis.com/reel-artifacts/out%201/what%3F.gif"
        );
    }
}
