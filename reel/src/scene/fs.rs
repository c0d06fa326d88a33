use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fontdue::{Font, FontSettings};
use tracing::debug;

use super::{
    CaptionLayout, SCENE_CONTENT_TYPE, SceneStager, badge_object, caption_badge,
    material_object, render_template, scene_object,
};
use crate::artifact::{ArtifactStore, Bucket, ObjectRef};
use crate::config::SceneConfig;
use crate::error::StageError;
use crate::job::{JobId, Product};

/// Bold face used for captions when no font file is configured.
pub(crate) const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// Stages scene assets from templates and a badge in a local directory.
///
/// For a job of product `p` it expands `{p}.obj.tmpl` and `{p}.mtl.tmpl`
/// and captions the configured badge image.
pub struct FsSceneStager {
    scene_dir: PathBuf,
    badge_file: String,
    layout: CaptionLayout,
    font: Arc<Font>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl std::fmt::Debug for FsSceneStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsSceneStager")
            .field("scene_dir", &self.scene_dir)
            .field("badge_file", &self.badge_file)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl FsSceneStager {
    /// Load the caption font and build a stager writing to `artifacts`.
    pub fn new(config: &SceneConfig, artifacts: Arc<dyn ArtifactStore>) -> Result<Self, StageError> {
        let scene_dir = PathBuf::from(&config.scene_dir);
        let font_bytes = match &config.font_file {
            Some(file) => {
                let path = scene_dir.join(file);
                std::fs::read(&path).map_err(|source| StageError::Read {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => BUNDLED_FONT.to_vec(),
        };
        let font = Font::from_bytes(font_bytes, FontSettings::default())
            .map_err(|e| StageError::Badge(format!("font: {e}")))?;

        Ok(Self {
            scene_dir,
            badge_file: config.badge_file.clone(),
            layout: CaptionLayout {
                x: config.caption_x,
                y: config.caption_y,
                px: config.caption_px,
            },
            font: Arc::new(font),
            artifacts,
        })
    }

    async fn read(&self, file: &str) -> Result<Vec<u8>, StageError> {
        let path = self.scene_dir.join(file);
        tokio::fs::read(&path)
            .await
            .map_err(|source| StageError::Read {
                path: path.display().to_string(),
                source,
            })
    }

    async fn stage_template(
        &self,
        name: &str,
        job_id: JobId,
        output: &ObjectRef,
    ) -> Result<(), StageError> {
        let bytes = self.read(name).await?;
        let source = String::from_utf8(bytes).map_err(|e| StageError::Template {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let rendered = render_template(name, &source, job_id)?;
        self.artifacts
            .put(output, rendered.into_bytes(), SCENE_CONTENT_TYPE)
            .await?;
        debug!(template = name, object = %output, "staged template");
        Ok(())
    }
}

#[async_trait]
impl SceneStager for FsSceneStager {
    async fn stage(
        &self,
        bucket: &Bucket,
        job_id: JobId,
        caption: &str,
        product: Product,
    ) -> Result<(), StageError> {
        let slug = product.slug();
        self.stage_template(&format!("{slug}.obj.tmpl"), job_id, &scene_object(bucket, job_id))
            .await?;
        self.stage_template(&format!("{slug}.mtl.tmpl"), job_id, &material_object(bucket, job_id))
            .await?;

        let badge = self.read(&self.badge_file).await?;
        let font = Arc::clone(&self.font);
        let caption = caption.to_string();
        let layout = self.layout;
        let png = tokio::task::spawn_blocking(move || caption_badge(&badge, &font, &caption, layout))
            .await
            .map_err(|e| StageError::Badge(e.to_string()))??;

        let output = badge_object(bucket, job_id);
        self.artifacts.put(&output, png, "image/png").await?;
        debug!(object = %output, "staged badge");
        Ok(())
    }
}
