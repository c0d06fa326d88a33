use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use reel::{
    FsArtifactStore, FsSceneStager, GifCompiler, HttpRenderer, LoggingConfig, Product,
    RedisStore, ReelSettings, ServiceContext, ServiceContextBuilder, WorkerRuntime,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "reel")]
#[command(about = "Fan-out/fan-in coordination for distributed frame rendering")]
struct Cli {
    /// Settings file layered over `reel.toml` and the defaults
    #[arg(short, long, env = "REEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the worker pool and the reclaim housekeeper until interrupted
    Worker {
        /// Worker loops in this process (overrides config)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },
    /// Start a render job and print its ID
    Start {
        /// Caption rendered into every frame
        caption: String,
        /// Product scene: grpc, kubernetes or gopher
        #[arg(short, long, default_value = "gopher")]
        product: String,
    },
    /// Print a job's status as JSON
    Status {
        /// Job ID returned by `start`
        job_id: String,
    },
    /// Run one reclaim sweep and print the report as JSON
    Sweep,
    /// Print current queue depths as JSON
    Snapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        ReelSettings::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&settings.logging);

    if let Command::Worker {
        parallelism: Some(parallelism),
    } = &cli.command
    {
        settings.worker.parallelism = *parallelism;
    }

    #[cfg(feature = "metrics")]
    reel::metrics::init_metrics()?;

    let ctx = build_context(&settings).await?;

    match cli.command {
        Command::Worker { .. } => run_worker(ctx, &settings).await,
        Command::Start { caption, product } => {
            let product: Product = product.parse()?;
            let job_id = reel::start_job(&ctx, &caption, product).await?;
            println!("{job_id}");
            Ok(())
        }
        Command::Status { job_id } => {
            let view = reel::get_job_str(&ctx, &job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Command::Sweep => {
            let report = reel::run_sweep(&ctx, chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Snapshot => {
            let snapshot = ctx.queue().snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_context(settings: &ReelSettings) -> anyhow::Result<ServiceContext> {
    let store = Arc::new(
        RedisStore::connect(
            &settings.persistence.redis_url,
            settings.persistence.key_prefix.clone(),
            settings.queue.retry(),
        )
        .await
        .context("failed to connect to Redis")?,
    );

    let renderer = HttpRenderer::new(
        &settings.render.renderer_url,
        Duration::from_secs(settings.render.render_timeout_secs),
    )
    .context("failed to build render client")?;

    let artifacts = Arc::new(FsArtifactStore::new(&settings.render.artifact_root));
    let compiler = GifCompiler::new(artifacts.clone()).with_frame_delay(Duration::from_millis(
        u64::from(settings.render.frame_delay_ms),
    ));
    let stager = FsSceneStager::new(&settings.scene, artifacts.clone())
        .context("failed to load scene settings")?;

    ServiceContextBuilder::new()
        .with_store(store)
        .with_renderer(Arc::new(renderer))
        .with_compiler(Arc::new(compiler))
        .with_artifacts(artifacts)
        .with_stager(Arc::new(stager))
        .with_render_config(settings.render.clone())
        .with_queue_config(settings.queue.clone())
        .build()
}

async fn run_worker(ctx: ServiceContext, settings: &ReelSettings) -> anyhow::Result<()> {
    let runtime = WorkerRuntime::new(Arc::new(ctx), settings.worker.clone());
    runtime.spawn_worker_pool().await;
    runtime.spawn_housekeeper().await;
    info!(
        worker_id = %settings.worker.worker_id,
        parallelism = settings.worker.parallelism,
        "worker runtime started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    runtime.shutdown().await
}
