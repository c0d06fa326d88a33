use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ArtifactStore, Bucket, ObjectRef};
use crate::error::ArtifactError;

/// Artifact store on a local directory, one subdirectory per bucket.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsArtifactStore {
    /// Store rooted at `root`, one subdirectory per bucket.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    /// Serve public objects under `base` (e.g. a static file server URL).
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    /// Directory holding the buckets.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, obj: &ObjectRef) -> Result<PathBuf, ArtifactError> {
        if !obj.is_valid() || obj.name.split('/').any(|part| part == "..") {
            return Err(ArtifactError::InvalidRef {
                uri: obj.to_string(),
                reason: "not addressable on the local filesystem".to_string(),
            });
        }
        Ok(self.root.join(obj.bucket.as_str()).join(&obj.name))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn list(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<ObjectRef>, ArtifactError> {
        let base = self.root.join(bucket.as_str());
        let mut found = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if name.starts_with(prefix) {
                    found.push(bucket.object(name));
                }
            }
        }

        debug!(bucket = %bucket, prefix, count = found.len(), "listed artifacts");
        Ok(found)
    }

    async fn get(&self, obj: &ObjectRef) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_of(obj)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::Missing(obj.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        obj: &ObjectRef,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        let path = self.path_of(obj)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(object = %obj, content_type, size = bytes.len(), "writing artifact");
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn make_public(&self, obj: &ObjectRef) -> Result<(), ArtifactError> {
        // Local files carry no ACLs; publishing only requires existence.
        let path = self.path_of(obj)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ArtifactError::Missing(obj.to_string()));
        }
        Ok(())
    }

    fn public_location(&self, obj: &ObjectRef) -> String {
        match &self.public_base {
            Some(base) => format!("{base}/{}/{}", obj.bucket, obj.name),
            None => format!("{}/{}", obj.bucket, obj.name),
        }
    }
}
