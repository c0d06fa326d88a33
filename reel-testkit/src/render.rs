use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use reel::*;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Encode a tiny solid PNG whose red channel carries `frame`.
pub fn png_frame(frame: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(4, 4, Rgba([(frame % 256) as u8, 0, 0, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encoding an in-memory PNG cannot fail");
    bytes
}

/// Renderer that writes a small PNG to the requested output location.
#[derive(Clone)]
pub struct MockRenderer {
    artifacts: Arc<dyn ArtifactStore>,
    calls: Arc<Mutex<Vec<RenderRequest>>>,
    failing_frames: Arc<Mutex<HashSet<u32>>>,
    transient_failures: Arc<Mutex<u32>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockRenderer {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            calls: Arc::new(Mutex::new(Vec::new())),
            failing_frames: Arc::new(Mutex::new(HashSet::new())),
            transient_failures: Arc::new(Mutex::new(0)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Every render of `frame` fails.
    pub fn fail_frame(&self, frame: u32) {
        self.failing_frames.lock().insert(frame);
    }

    /// The next `count` renders fail, whatever their frame.
    pub fn fail_next(&self, count: u32) {
        *self.transient_failures.lock() = count;
    }

    /// Sleep before every render.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<RenderRequest> {
        self.calls.lock().clone()
    }

    pub fn assert_render_count_eq(&self, expected: usize) {
        assert_eq!(
            self.calls.lock().len(),
            expected,
            "Expected {} renders, got {}",
            expected,
            self.calls.lock().len()
        );
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.failing_frames.lock().clear();
        *self.transient_failures.lock() = 0;
    }

    fn should_fail(&self, frame: u32) -> bool {
        if self.failing_frames.lock().contains(&frame) {
            return true;
        }
        let mut remaining = self.transient_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render_frame(
        &self,
        request: &RenderRequest,
    ) -> Result<FrameLocation, RenderError> {
        self.calls.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail(request.frame) {
            return Err(RenderError::Failed(format!(
                "mock failure for frame {}",
                request.frame
            )));
        }

        self.artifacts
            .put(&request.output, png_frame(request.frame), "image/png")
            .await
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        Ok(FrameLocation {
            frame_location: request.output.to_string(),
        })
    }
}
