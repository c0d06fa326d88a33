//! Per-job scene staging.
//!
//! Before a job's tasks are enqueued, the dispatcher stages the assets every
//! frame of that job renders from: the product mesh and material with the
//! job ID baked in, and a badge carrying the job's caption.

use async_trait::async_trait;

use crate::artifact::{Bucket, ObjectRef};
use crate::error::StageError;
use crate::job::{JobId, Product};

#[cfg(feature = "scene")]
mod caption;
#[cfg(feature = "scene")]
mod fs;
#[cfg(feature = "scene")]
mod template;

#[cfg(feature = "scene")]
pub use caption::{CaptionLayout, caption_badge};
#[cfg(feature = "scene")]
pub use fs::FsSceneStager;
#[cfg(feature = "scene")]
pub use template::render_template;

/// Content type of staged meshes and materials.
pub const SCENE_CONTENT_TYPE: &str = "binary/octet-stream";

/// Textures every scene references regardless of product.
pub const PRODUCT_TEXTURES: [&str; 2] = ["k8s.png", "grpc.png"];

/// Staged mesh of `job_id`.
pub fn scene_object(bucket: &Bucket, job_id: JobId) -> ObjectRef {
    bucket.object(format!("job_{job_id}.obj"))
}

/// Staged material of `job_id`.
pub fn material_object(bucket: &Bucket, job_id: JobId) -> ObjectRef {
    bucket.object(format!("job_{job_id}.mtl"))
}

/// Staged caption badge of `job_id`.
pub fn badge_object(bucket: &Bucket, job_id: JobId) -> ObjectRef {
    bucket.object(format!("job_{job_id}_badge.png"))
}

/// Writes a job's scene assets into the artifact store.
///
/// Implementations must have uploaded [`scene_object`], [`material_object`]
/// and [`badge_object`] for the job when `stage` returns `Ok`.
#[async_trait]
pub trait SceneStager: Send + Sync {
    /// Stage the assets of `job_id` into `bucket`.
    async fn stage(
        &self,
        bucket: &Bucket,
        job_id: JobId,
        caption: &str,
        product: Product,
    ) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_object_names() {
        let bucket = Bucket::new("reel-artifacts");
        assert_eq!(scene_object(&bucket, JobId(3)).name, "job_3.obj");
        assert_eq!(material_object(&bucket, JobId(3)).name, "job_3.mtl");
        assert_eq!(
            badge_object(&bucket, JobId(3)).to_string(),
            "gs://reel-artifacts/job_3_badge.png"
        );
    }
}
