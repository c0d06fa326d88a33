//! Reel - fan-out/fan-in coordination for distributed frame rendering.
//!
//! A job request becomes N independent frame tasks on a shared queue. A pool
//! of stateless workers leases tasks, calls a renderer for each frame and
//! resolves the task. The worker that resolves a job's last task compiles
//! the frames into a single animated artifact and marks the job done, while
//! clients poll the job's status.
//!
//! # Core Concepts
//!
//! - **Job store**: The [`JobStore`] trait holds job records and the two
//!   per-job counters (`queued`, `completed`) whose equality signals fan-in.
//!
//! - **Task queue**: The [`TaskQueue`] trait is a list-based queue with a
//!   two-phase leased state (`queued` → `processing` → resolved). Expired
//!   leases are reclaimed by a [`LeaseExpiryScanner`] sweep.
//!
//! - **Context**: [`ServiceContext`] carries every dependency; build it with
//!   [`ServiceContextBuilder`].
//!
//! - **Scene staging**: a [`SceneStager`] writes each job's mesh, material
//!   and caption badge before its tasks are enqueued.
//!
//! - **Operations**: [`start_job`] fans out, [`process_lease`] renders and
//!   counts one task, [`aggregate`] fans in and [`get_job`] reports status.
//!
//! - **Runtime**: [`WorkerRuntime`] runs the worker pool and the reclaim
//!   housekeeper until shut down.
//!
//! # Feature Flags
//!
//! - `gif` (default) - [`GifCompiler`] via the `image` crate
//! - `scene` (default) - [`FsSceneStager`] via `fontdue` and `regex`
//! - `redis` - [`RedisStore`] backend
//! - `http` - [`HttpRenderer`] client
//! - `metrics` - Prometheus metrics
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reel::*;
//!
//! let store = Arc::new(MemoryStore::default());
//! let ctx = ServiceContextBuilder::new()
//!     .with_store(store)
//!     .with_renderer(renderer)
//!     .with_compiler(compiler)
//!     .with_artifacts(artifacts)
//!     .with_stager(stager)
//!     .build()?;
//!
//! let job_id = start_job(&ctx, "alice", Product::Kubernetes).await?;
//! let view = get_job(&ctx, job_id).await?;
//! ```

/// Fan-in: ordered frame listing and final artifact compilation.
pub mod aggregator;

/// Artifact references and the object store boundary.
pub mod artifact;

/// Frame-sequence compilers.
pub mod compiler;

/// Configuration structures for rendering, queueing and persistence.
///
/// [`ReelSettings::load`] layers a config file and `REEL__*` environment
/// variables over the defaults.
pub mod config;

/// Shared dependencies of every operation.
pub mod context;

/// Fan-out of a job request into frame tasks.
pub mod dispatcher;

/// Error taxonomy.
pub mod error;

/// Event publishing and subscription system.
///
/// The `events` module provides [`RenderEventPublisher`] and the in-process
/// [`InProcEventBus`] broadcasting [`RenderEvent`]s for job and task
/// transitions.
pub mod events;

/// Job identifiers, records, task keys and task payloads.
pub mod job;

/// Task leases and the reclaim policy.
///
/// The `lease` module provides:
/// - [`TaskLease`] - an entry held in `processing`
/// - [`LeaseId`] - unique lease identifier
/// - [`LeaseRetryConfig`] - attempt limit and lease TTL
/// - [`ResurrectionOutcome`] and [`SweepReport`] - reclaim results
pub mod lease;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Job store and task queue backends.
pub mod persistence;

/// Task queue and lease scanner traits.
pub mod queue;

/// Renderer boundary and render requests.
pub mod render;

/// Per-job scene staging ahead of fan-out.
pub mod scene;

/// Worker runtime and context builder.
///
/// The `runtime` module provides:
/// - [`WorkerRuntime`] - worker pool plus reclaim housekeeper
/// - [`ShutdownToken`] - graceful shutdown signaling
/// - [`ServiceContextBuilder`] - dependency assembly
/// - [`WorkerConfig`] - worker identity and parallelism
pub mod runtime;

/// Job status projection.
pub mod status;

/// Job store trait.
pub mod store;

/// Tracing spans and lifecycle recording.
pub mod telemetry;

pub use aggregator::{aggregate, final_artifact, ordered_frames};
pub use artifact::{ArtifactStore, Bucket, FsArtifactStore, ObjectRef};
#[cfg(feature = "gif")]
pub use compiler::GifCompiler;
pub use compiler::{ArtifactCompiler, FINAL_ARTIFACT_NAME};
pub use self::config::*;
pub use context::ServiceContext;
pub use dispatcher::start_job;
pub use error::*;
pub use events::*;
pub use job::*;
pub use lease::*;
pub use persistence::MemoryStore;
#[cfg(feature = "redis")]
pub use persistence::RedisStore;
pub use queue::*;
#[cfg(feature = "http")]
pub use render::HttpRenderer;
pub use render::{FrameLocation, RenderRequest, Renderer};
#[cfg(feature = "scene")]
pub use scene::FsSceneStager;
pub use scene::SceneStager;
pub use runtime::{
    ServiceContextBuilder, ShutdownToken, TaskOutcome, WorkerConfig,
    WorkerRuntime, process_lease, run_sweep,
};
pub use status::{JobProgress, JobView, get_job, get_job_str, job_progress};
pub use store::JobStore;
