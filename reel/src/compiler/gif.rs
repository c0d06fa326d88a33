use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat};
use tracing::debug;

use super::ArtifactCompiler;
use crate::artifact::{ArtifactStore, ObjectRef};
use crate::error::CompileError;
use crate::job::JobId;

/// Compiles PNG frames into a looping animated GIF.
#[derive(Clone)]
pub struct GifCompiler {
    store: Arc<dyn ArtifactStore>,
    frame_delay: Duration,
}

impl std::fmt::Debug for GifCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifCompiler")
            .field("frame_delay", &self.frame_delay)
            .finish_non_exhaustive()
    }
}

impl GifCompiler {
    /// Compiler reading frames from and writing the GIF to `store`.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            frame_delay: Duration::ZERO,
        }
    }

    /// Uniform delay between frames.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

fn encode_gif(
    frames: Vec<(String, Vec<u8>)>,
    delay: Duration,
) -> Result<Vec<u8>, CompileError> {
    let delay = Delay::from_saturating_duration(delay);
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| CompileError::Codec(e.to_string()))?;

        for (name, bytes) in frames {
            let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                .map_err(|e| CompileError::Codec(format!("{name}: {e}")))?;
            encoder
                .encode_frame(Frame::from_parts(image.to_rgba8(), 0, 0, delay))
                .map_err(|e| CompileError::Codec(format!("{name}: {e}")))?;
        }
    }
    Ok(out)
}

#[async_trait]
impl ArtifactCompiler for GifCompiler {
    async fn compile(
        &self,
        job_id: JobId,
        frames: &[ObjectRef],
        output: &ObjectRef,
    ) -> Result<(), CompileError> {
        if frames.is_empty() {
            return Err(CompileError::NoFrames(job_id));
        }

        let mut loaded = Vec::with_capacity(frames.len());
        for frame in frames {
            loaded.push((frame.to_string(), self.store.get(frame).await?));
        }

        let delay = self.frame_delay;
        let bytes = tokio::task::spawn_blocking(move || encode_gif(loaded, delay))
            .await
            .map_err(|e| CompileError::Codec(format!("encoder task failed: {e}")))??;

        debug!(job_id = %job_id, frames = frames.len(), size = bytes.len(), "encoded gif");
        self.store.put(output, bytes, "image/gif").await?;
        Ok(())
    }
}
