use std::fmt;
use std::sync::Arc;

use crate::artifact::{ArtifactStore, Bucket};
use crate::compiler::ArtifactCompiler;
use crate::config::{QueueConfig, RenderConfig};
use crate::context::ServiceContext;
use crate::events::{InProcEventBus, RenderEventPublisher};
use crate::queue::{LeaseExpiryScanner, TaskQueue};
use crate::render::Renderer;
use crate::scene::SceneStager;
use crate::store::JobStore;

/// Builder for a [`ServiceContext`] with explicit dependencies.
///
/// The store, renderer, compiler, artifact store and scene stager are
/// required. Events default to a fresh [`InProcEventBus`]; render settings
/// default to [`RenderConfig::default`]. Queue settings default to
/// [`QueueConfig::default`] with the attempt limit and lease TTL taken from
/// the scanner, and an explicit queue config must agree with the scanner.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::default());
/// let ctx = ServiceContextBuilder::new()
///     .with_store(store)
///     .with_renderer(renderer)
///     .with_compiler(compiler)
///     .with_artifacts(artifacts)
///     .with_stager(stager)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ServiceContextBuilder {
    jobs: Option<Arc<dyn JobStore>>,
    queue: Option<Arc<dyn TaskQueue>>,
    scanner: Option<Arc<dyn LeaseExpiryScanner>>,
    renderer: Option<Arc<dyn Renderer>>,
    compiler: Option<Arc<dyn ArtifactCompiler>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    stager: Option<Arc<dyn SceneStager>>,
    events: Option<Arc<dyn RenderEventPublisher>>,
    render: RenderConfig,
    queue_config: Option<QueueConfig>,
}

impl fmt::Debug for ServiceContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContextBuilder")
            .field("jobs_set", &self.jobs.is_some())
            .field("queue_set", &self.queue.is_some())
            .field("scanner_set", &self.scanner.is_some())
            .field("renderer_set", &self.renderer.is_some())
            .field("compiler_set", &self.compiler.is_some())
            .field("artifacts_set", &self.artifacts.is_some())
            .field("stager_set", &self.stager.is_some())
            .field("events_set", &self.events.is_some())
            .field("render", &self.render)
            .field("queue_config", &self.queue_config)
            .finish()
    }
}

impl ServiceContextBuilder {
    /// Create a builder with no dependencies set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one backend as job store, task queue and lease scanner.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: JobStore + TaskQueue + LeaseExpiryScanner + 'static,
    {
        self.jobs = Some(store.clone());
        self.queue = Some(store.clone());
        self.scanner = Some(store);
        self
    }

    /// Set the job store.
    pub fn with_jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Set the task queue and its lease scanner.
    pub fn with_queue<Q>(mut self, queue: Arc<Q>) -> Self
    where
        Q: TaskQueue + LeaseExpiryScanner + 'static,
    {
        self.queue = Some(queue.clone());
        self.scanner = Some(queue);
        self
    }

    /// Set the renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Set the artifact compiler.
    pub fn with_compiler(mut self, compiler: Arc<dyn ArtifactCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Set the artifact store.
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Set the scene stager.
    pub fn with_stager(mut self, stager: Arc<dyn SceneStager>) -> Self {
        self.stager = Some(stager);
        self
    }

    /// Set the event publisher.
    pub fn with_events(mut self, events: Arc<dyn RenderEventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set job shape and publication settings.
    pub fn with_render_config(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    /// Set queue timing and retry settings.
    ///
    /// `max_attempts` and `lease_ttl_secs` must match the scanner's
    /// [`retry_config`](LeaseExpiryScanner::retry_config).
    pub fn with_queue_config(mut self, queue_config: QueueConfig) -> Self {
        self.queue_config = Some(queue_config);
        self
    }

    /// Build the context.
    ///
    /// # Errors
    ///
    /// Returns an error if a required dependency is missing, the configured
    /// bucket name is invalid, or the queue config's retry policy differs
    /// from the scanner's.
    pub fn build(self) -> anyhow::Result<ServiceContext> {
        let jobs = self
            .jobs
            .ok_or_else(|| anyhow::anyhow!("jobs dependency missing"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue dependency missing"))?;
        let scanner = self
            .scanner
            .ok_or_else(|| anyhow::anyhow!("scanner dependency missing"))?;
        let renderer = self
            .renderer
            .ok_or_else(|| anyhow::anyhow!("renderer dependency missing"))?;
        let compiler = self
            .compiler
            .ok_or_else(|| anyhow::anyhow!("compiler dependency missing"))?;
        let artifacts = self
            .artifacts
            .ok_or_else(|| anyhow::anyhow!("artifacts dependency missing"))?;
        let stager = self
            .stager
            .ok_or_else(|| anyhow::anyhow!("stager dependency missing"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::default()));

        let bucket = Bucket::new(self.render.bucket.clone());
        if !bucket.is_valid() {
            anyhow::bail!("invalid bucket name `{}`", bucket);
        }
        if self.render.frames_per_job == 0 {
            anyhow::bail!("frames_per_job must be at least 1");
        }

        let retry = scanner.retry_config();
        let queue_config = match self.queue_config {
            Some(config) if config.retry() != retry => anyhow::bail!(
                "queue config retry policy {:?} disagrees with the store's {:?}",
                config.retry(),
                retry
            ),
            Some(config) => config,
            None => QueueConfig {
                max_attempts: retry.max_attempts,
                lease_ttl_secs: retry.lease_ttl_secs,
                ..QueueConfig::default()
            },
        };

        Ok(ServiceContext {
            jobs,
            queue,
            scanner,
            renderer,
            compiler,
            artifacts,
            stager,
            events,
            render: self.render,
            queue_config,
            bucket,
        })
    }
}
