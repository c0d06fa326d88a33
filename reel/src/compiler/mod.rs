//! Artifact compiler boundary.

use async_trait::async_trait;

use crate::artifact::ObjectRef;
use crate::error::CompileError;
use crate::job::JobId;

#[cfg(feature = "gif")]
mod gif;

#[cfg(feature = "gif")]
pub use gif::GifCompiler;

/// Name of the compiled artifact under a job's output prefix.
pub const FINAL_ARTIFACT_NAME: &str = "animated.gif";

/// Turns an ordered frame sequence into a single artifact.
#[async_trait]
pub trait ArtifactCompiler: Send + Sync {
    /// Compile `frames`, in the given order, and write the result to
    /// `output`.
    async fn compile(
        &self,
        job_id: JobId,
        frames: &[ObjectRef],
        output: &ObjectRef,
    ) -> Result<(), CompileError>;
}
