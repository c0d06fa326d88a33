use reel::*;
use std::sync::Arc;
use std::time::Duration;

/// A [`ServiceContext`] wired to in-memory fakes, with handles to each.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub artifacts: Arc<crate::InMemoryArtifactStore>,
    pub renderer: Arc<crate::MockRenderer>,
    pub compiler: Arc<crate::RecordingCompiler>,
    pub stager: Arc<crate::RecordingStager>,
    pub ctx: Arc<ServiceContext>,
}

impl TestHarness {
    /// Harness with `frames` tasks per job in bucket `bucket`.
    pub fn new(frames: u32) -> Self {
        let (render, queue) = Self::default_config(frames);
        Self::with_config(render, queue)
    }

    fn default_config(frames: u32) -> (RenderConfig, QueueConfig) {
        (
            RenderConfig {
                frames_per_job: frames,
                bucket: "bucket".to_string(),
                ..RenderConfig::default()
            },
            QueueConfig {
                lease_wait_ms: 50,
                store_error_backoff_ms: 10,
                ..QueueConfig::default()
            },
        )
    }

    pub fn with_config(render: RenderConfig, queue: QueueConfig) -> Self {
        let store = Arc::new(MemoryStore::new(queue.retry()));
        Self::assemble(store.clone(), store, render, queue)
    }

    /// Harness whose context talks to the store through a [`FlakyStore`].
    ///
    /// `harness.store` is the wrapped store, untouched by injected faults.
    pub fn with_flaky_store(frames: u32) -> (Self, Arc<crate::FlakyStore>) {
        let (render, queue) = Self::default_config(frames);
        let store = Arc::new(MemoryStore::new(queue.retry()));
        let flaky = Arc::new(crate::FlakyStore::new(store.clone()));
        (Self::assemble(store, flaky.clone(), render, queue), flaky)
    }

    fn assemble<S>(
        store: Arc<MemoryStore>,
        backend: Arc<S>,
        render: RenderConfig,
        queue: QueueConfig,
    ) -> Self
    where
        S: JobStore + TaskQueue + LeaseExpiryScanner + 'static,
    {
        let artifacts = Arc::new(crate::InMemoryArtifactStore::new());
        let renderer = Arc::new(crate::MockRenderer::new(artifacts.clone()));
        let compiler = Arc::new(crate::RecordingCompiler::new(artifacts.clone()));
        let stager = Arc::new(crate::RecordingStager::new(artifacts.clone()));

        let ctx = ServiceContextBuilder::new()
            .with_store(backend)
            .with_renderer(renderer.clone())
            .with_compiler(compiler.clone())
            .with_artifacts(artifacts.clone())
            .with_stager(stager.clone())
            .with_render_config(render)
            .with_queue_config(queue)
            .build()
            .expect("test harness context must build");

        Self {
            store,
            artifacts,
            renderer,
            compiler,
            stager,
            ctx: Arc::new(ctx),
        }
    }

    /// Same fakes, but frames are compiled by the real [`GifCompiler`].
    pub fn with_gif(frames: u32) -> Self {
        let mut harness = Self::new(frames);
        let compiler = Arc::new(GifCompiler::new(harness.artifacts.clone()));
        let ctx = ServiceContextBuilder::new()
            .with_store(harness.store.clone())
            .with_renderer(harness.renderer.clone())
            .with_compiler(compiler)
            .with_artifacts(harness.artifacts.clone())
            .with_stager(harness.stager.clone())
            .with_render_config(harness.ctx.render_config().clone())
            .with_queue_config(harness.ctx.queue_config().clone())
            .build()
            .expect("test harness context must build");
        harness.ctx = Arc::new(ctx);
        harness
    }
}

/// Lease and process tasks until the queue stays empty for one short wait.
pub async fn drain(ctx: &ServiceContext, worker_id: &str) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::new();
    while let Some(lease) = ctx
        .queue()
        .lease_next(worker_id, Duration::from_millis(20))
        .await
        .expect("memory store lease cannot fail")
    {
        outcomes.push(
            process_lease(ctx, lease)
                .await
                .expect("memory store operations cannot fail"),
        );
    }
    outcomes
}
