use async_trait::async_trait;
use parking_lot::Mutex;
use reel::scene::{SCENE_CONTENT_TYPE, badge_object, material_object, scene_object};
use reel::*;
use std::sync::Arc;

/// One `stage` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageRecord {
    pub job_id: JobId,
    pub caption: String,
    pub product: Product,
}

/// Stager that records its input and uploads placeholder assets under the
/// real object names.
#[derive(Clone)]
pub struct RecordingStager {
    artifacts: Arc<dyn ArtifactStore>,
    stages: Arc<Mutex<Vec<StageRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingStager {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            stages: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn record(&self) -> Vec<StageRecord> {
        self.stages.lock().clone()
    }

    /// Every `stage` call fails while set.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl SceneStager for RecordingStager {
    async fn stage(
        &self,
        bucket: &Bucket,
        job_id: JobId,
        caption: &str,
        product: Product,
    ) -> Result<(), StageError> {
        self.stages.lock().push(StageRecord {
            job_id,
            caption: caption.to_string(),
            product,
        });

        if *self.fail.lock() {
            return Err(StageError::Template {
                name: format!("{}.obj.tmpl", product.slug()),
                reason: "mock staging failure".to_string(),
            });
        }

        let mesh = format!("o {}\n", product.slug());
        self.artifacts
            .put(&scene_object(bucket, job_id), mesh.into_bytes(), SCENE_CONTENT_TYPE)
            .await?;
        self.artifacts
            .put(&material_object(bucket, job_id), b"newmtl badge\n".to_vec(), SCENE_CONTENT_TYPE)
            .await?;
        self.artifacts
            .put(&badge_object(bucket, job_id), crate::png_frame(0), "image/png")
            .await?;
        Ok(())
    }
}
