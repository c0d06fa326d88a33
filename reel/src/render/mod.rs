//! Renderer boundary.
//!
//! The worker turns a leased [`RenderTask`] into a [`RenderRequest`] and
//! hands it to a [`Renderer`], which writes one frame artifact and reports
//! where it landed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{Bucket, ObjectRef};
use crate::error::RenderError;
use crate::job::{JobId, Product, RenderTask, TaskKey};
use crate::scene::{PRODUCT_TEXTURES, badge_object, material_object, scene_object};

/// HTTP client for a remote render service.
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpRenderer;

/// Prefix under which all of a job's artifacts are written.
pub fn output_prefix(job_id: JobId) -> String {
    format!("out.{job_id}")
}

/// Object name of one frame.
///
/// The frame index is zero-padded so lexicographic order equals frame
/// order; the aggregator relies on this.
pub fn frame_object_name(job_id: JobId, frame: u32) -> String {
    format!("{}/frame_{frame:05}.png", output_prefix(job_id))
}

/// Everything the renderer needs to produce one frame.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Task being rendered.
    pub key: TaskKey,
    /// Zero-based frame index.
    pub frame: u32,
    /// Caption already drawn on the staged badge.
    pub caption: String,
    /// Product the scene was staged for.
    pub product: Product,
    /// Scene mesh staged for the job.
    pub scene: ObjectRef,
    /// Materials and textures the scene references.
    pub assets: Vec<ObjectRef>,
    /// Where the frame must be written.
    pub output: ObjectRef,
    /// Camera-relative rotation of the model, in degrees.
    pub rotation_degrees: u32,
    /// Render passes per frame.
    pub iterations: u32,
}

impl RenderRequest {
    /// Derive the request for a task of `key.job_id` in `bucket`.
    pub fn for_task(bucket: &Bucket, key: TaskKey, task: &RenderTask) -> Self {
        let job = key.job_id;
        Self {
            key,
            frame: task.frame,
            caption: task.caption.clone(),
            product: task.product,
            scene: scene_object(bucket, job),
            assets: [material_object(bucket, job), badge_object(bucket, job)]
                .into_iter()
                .chain(PRODUCT_TEXTURES.map(|name| bucket.object(name)))
                .collect(),
            output: bucket.object(frame_object_name(job, task.frame)),
            rotation_degrees: task.frame * 2 + 20,
            iterations: 1,
        }
    }
}

/// Location of a rendered frame.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FrameLocation {
    /// Where the renderer wrote the frame, as it reports it.
    pub frame_location: String,
}

/// External per-task rendering capability.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render one frame and return where it was written.
    async fn render_frame(
        &self,
        request: &RenderRequest,
    ) -> Result<FrameLocation, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_names_sort_in_frame_order() {
        let job = JobId(7);
        let mut names: Vec<_> = [10, 2, 0, 14, 1].map(|f| frame_object_name(job, f)).to_vec();
        names.sort();
        assert_eq!(names[0], "out.7/frame_00000.png");
        assert_eq!(names[1], "out.7/frame_00001.png");
        assert_eq!(names[2], "out.7/frame_00002.png");
        assert_eq!(names[3], "out.7/frame_00010.png");
        assert_eq!(names[4], "out.7/frame_00014.png");
    }

    #[test]
    fn test_request_for_task() {
        let bucket = Bucket::new("reel-artifacts");
        let task = RenderTask {
            frame: 4,
            caption: "alice".into(),
            product: Product::Kubernetes,
        };
        let req = RenderRequest::for_task(&bucket, TaskKey::new(JobId(1), 5), &task);

        assert_eq!(req.rotation_degrees, 28);
        assert_eq!(req.scene.to_string(), "gs://reel-artifacts/job_1.obj");
        assert_eq!(req.output.name, "out.1/frame_00004.png");
        let assets: Vec<_> = req.assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(assets, ["job_1.mtl", "job_1_badge.png", "k8s.png", "grpc.png"]);
    }

    #[test]
    fn test_every_product_ships_both_textures() {
        let bucket = Bucket::new("reel-artifacts");
        for product in [Product::Grpc, Product::Kubernetes, Product::Gopher] {
            let task = RenderTask {
                frame: 0,
                caption: "x".into(),
                product,
            };
            let req = RenderRequest::for_task(&bucket, TaskKey::new(JobId(2), 1), &task);
            let names: Vec<_> = req.assets.iter().map(|a| a.name.as_str()).collect();
            assert_eq!(&names[2..], ["k8s.png", "grpc.png"]);
        }
    }
}
