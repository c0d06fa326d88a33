use thiserror::Error;

use crate::job::{JobId, TaskKey};

/// Failure of the job store or task queue substrate.
///
/// Store errors are treated as transient: the worker loop logs them and
/// retries after a short fixed delay, while the dispatcher and status
/// service surface them to their caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A persisted value could not be serialized or parsed.
    #[error("corrupt store value at `{key}`: {reason}")]
    Corrupt {
        /// Store key holding the bad value.
        key: String,
        /// Parser message.
        reason: String,
    },
}

impl StoreError {
    /// Build a [`StoreError::Corrupt`] for the given key.
    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Failure reported by the external renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The renderer could not be reached.
    #[error("render transport error: {0}")]
    Transport(String),
    /// The renderer was reached but failed to produce the frame.
    #[error("render failed: {0}")]
    Failed(String),
}

/// Failure of an artifact store operation.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The object reference is not a valid `gs://bucket/name` URI.
    #[error("invalid object reference `{uri}`: {reason}")]
    InvalidRef {
        /// Offending URI.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The object does not exist.
    #[error("artifact `{0}` not found")]
    Missing(String),
    /// Underlying I/O failed.
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the artifact compiler.
#[derive(Debug, Error)]
pub enum CompileError {
    /// No frames were found for the job.
    #[error("no frames to compile for job {0}")]
    NoFrames(JobId),
    /// A frame could not be decoded or the output could not be encoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// Reading frames or writing the output failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Failure while staging a job's scene assets.
#[derive(Debug, Error)]
pub enum StageError {
    /// A scene file could not be read.
    #[error("cannot read scene file `{path}`: {source}")]
    Read {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A scene template is not valid UTF-8 or uses an unsupported action.
    #[error("template `{name}`: {reason}")]
    Template {
        /// Template file name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The badge font or image could not be processed.
    #[error("badge error: {0}")]
    Badge(String),
    /// Uploading a staged asset failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Top-level error taxonomy for the coordination core.
#[derive(Debug, Error)]
pub enum ReelError {
    /// Unknown job identifier.
    #[error("job {0} not found")]
    NotFound(String),
    /// Transient store or queue failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The renderer failed for a task.
    #[error("render failure for task {key}: {source}")]
    Render {
        /// Task whose frame failed.
        key: TaskKey,
        /// Renderer error.
        #[source]
        source: RenderError,
    },
    /// A task payload could not be decoded.
    #[error("malformed payload for task {key}: {reason}")]
    Decode {
        /// Task with the bad payload.
        key: TaskKey,
        /// Decoder message.
        reason: String,
    },
    /// A task payload could not be encoded.
    #[error("cannot encode payload for task {key}: {reason}")]
    Encode {
        /// Task being enqueued.
        key: TaskKey,
        /// Encoder message.
        reason: String,
    },
    /// Staging a job's scene assets failed; nothing was enqueued.
    #[error("scene staging failed for job {job_id}: {source}")]
    Stage {
        /// Job being started.
        job_id: JobId,
        /// Stager error.
        #[source]
        source: StageError,
    },
    /// Aggregating a job's frames failed.
    #[error("aggregation failed for job {job_id}: {source}")]
    Aggregation {
        /// Job whose aggregation failed.
        job_id: JobId,
        /// Compiler error.
        #[source]
        source: CompileError,
    },
    /// Artifact listing or publication failed outside the compiler.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Invalid configuration.
    #[error("invalid configuration for `{key}`: {reason}")]
    Config {
        /// Configuration key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ReelError {
    /// Build a [`ReelError::Config`].
    pub fn config(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            key,
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ReelError> = std::result::Result<T, E>;
