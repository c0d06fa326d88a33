use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{ArtifactStore, Bucket};
use crate::compiler::ArtifactCompiler;
use crate::config::{QueueConfig, RenderConfig};
use crate::events::{RenderEvent, RenderEventPayload, RenderEventPublisher};
use crate::queue::{LeaseExpiryScanner, TaskQueue};
use crate::render::Renderer;
use crate::scene::SceneStager;
use crate::store::JobStore;

/// Everything the dispatcher, workers, aggregator and status service share.
///
/// Built once with [`ServiceContextBuilder`](crate::runtime::ServiceContextBuilder)
/// and passed around by reference or behind an [`Arc`].
pub struct ServiceContext {
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) scanner: Arc<dyn LeaseExpiryScanner>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) compiler: Arc<dyn ArtifactCompiler>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) stager: Arc<dyn SceneStager>,
    pub(crate) events: Arc<dyn RenderEventPublisher>,
    pub(crate) render: RenderConfig,
    pub(crate) queue_config: QueueConfig,
    pub(crate) bucket: Bucket,
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("bucket", &self.bucket)
            .field("render", &self.render)
            .field("queue", &self.queue_config)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    /// Job records and per-job counters.
    pub fn jobs(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }

    /// Shared task queue.
    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    /// Expired-lease scanner over [`queue`](Self::queue).
    pub fn scanner(&self) -> &dyn LeaseExpiryScanner {
        self.scanner.as_ref()
    }

    /// Per-frame renderer.
    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Compiler producing a job's final artifact.
    pub fn compiler(&self) -> &dyn ArtifactCompiler {
        self.compiler.as_ref()
    }

    /// Object store holding staged assets, frames and final artifacts.
    pub fn artifacts(&self) -> &dyn ArtifactStore {
        self.artifacts.as_ref()
    }

    /// Stager writing a job's scene assets before fan-out.
    pub fn stager(&self) -> &dyn SceneStager {
        self.stager.as_ref()
    }

    /// Event publisher; clone it to subscribe from another task.
    pub fn events(&self) -> Arc<dyn RenderEventPublisher> {
        Arc::clone(&self.events)
    }

    /// Job shape and publication settings.
    pub fn render_config(&self) -> &RenderConfig {
        &self.render
    }

    /// Queue timing and retry settings, consistent with the scanner's
    /// retry policy.
    pub fn queue_config(&self) -> &QueueConfig {
        &self.queue_config
    }

    /// Bucket receiving frames and final artifacts.
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub(crate) fn lease_wait(&self) -> Duration {
        Duration::from_millis(self.queue_config.lease_wait_ms)
    }

    pub(crate) fn store_error_backoff(&self) -> Duration {
        Duration::from_millis(self.queue_config.store_error_backoff_ms)
    }

    /// Publish an event; failures are logged, never propagated.
    pub(crate) async fn emit(&self, payload: RenderEventPayload) {
        let kind = payload.kind();
        if let Err(err) = self.events.publish(RenderEvent::new(payload)).await {
            tracing::error!(event = kind, "publish event failed: {err}");
        }
    }
}
