use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::Instrument;

use crate::aggregator;
use crate::context::ServiceContext;
use crate::error::{ReelError, Result};
use crate::events::RenderEventPayload;
use crate::job::{JobId, RenderTask};
use crate::lease::{ResurrectionOutcome, SweepReport, TaskLease};
use crate::render::RenderRequest;
use crate::telemetry;

use super::worker::WorkerConfig;

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one leased task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Resolved and counted; the job still has outstanding tasks.
    Completed { completed: u64, queued: u64 },
    /// Resolved as the job's last task; the job is done.
    Aggregated { final_path: String },
    /// Resolved as the job's last task, but aggregation failed.
    AggregationFailed { error: String },
    /// The lease was reclaimed before the task finished; not counted.
    LeaseLost,
    /// The renderer failed; `None` when the lease had already been lost.
    RenderFailed { outcome: Option<ResurrectionOutcome> },
    /// The payload could not be decoded.
    DeadLettered,
}

impl TaskOutcome {
    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed { .. }
            | TaskOutcome::Aggregated { .. }
            | TaskOutcome::AggregationFailed { .. } => "resolved",
            TaskOutcome::LeaseLost
            | TaskOutcome::RenderFailed { outcome: None } => "lost",
            TaskOutcome::RenderFailed {
                outcome: Some(ResurrectionOutcome::Requeued { .. }),
            } => "requeued",
            TaskOutcome::RenderFailed {
                outcome: Some(ResurrectionOutcome::DeadLettered { .. }),
            }
            | TaskOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Render, resolve and count one leased task.
///
/// The worker whose resolve brings the completed count level with the
/// queued count aggregates the job. Resolving and counting are one store
/// transaction, and only a worker that still held its lease at that point
/// counts, so each task is counted once even after a reclaim. Store errors
/// are returned; task-level failures are not.
pub async fn process_lease(ctx: &ServiceContext, lease: TaskLease) -> Result<TaskOutcome> {
    let key = lease.key;
    let job_id = key.job_id;

    let task = match RenderTask::decode(&lease.payload) {
        Ok(task) => task,
        Err(e) => {
            let err = ReelError::Decode {
                key,
                reason: e.to_string(),
            };
            tracing::warn!("{err}; dead-lettering");
            if ctx.queue().dead_letter(key, Some(err.to_string())).await? {
                ctx.emit(RenderEventPayload::TaskDeadLettered {
                    key,
                    reason: err.to_string(),
                })
                .await;
                return Ok(TaskOutcome::DeadLettered);
            }
            return Ok(TaskOutcome::LeaseLost);
        }
    };

    let request = RenderRequest::for_task(ctx.bucket(), key, &task);
    let started = Instant::now();
    let rendered = ctx.renderer().render_frame(&request).await;
    telemetry::observe_render_duration(key, rendered.is_ok(), started.elapsed().as_secs_f64());

    match rendered {
        Ok(location) => {
            tracing::debug!(frame_location = %location.frame_location, "frame rendered");
        }
        Err(source) => {
            let err = ReelError::Render { key, source };
            tracing::warn!(attempts = lease.attempts, "{err}");
            ctx.emit(RenderEventPayload::TaskFailed {
                key,
                error: err.to_string(),
            })
            .await;

            let outcome = ctx.queue().fail(key, Some(err.to_string())).await?;
            match outcome {
                Some(ResurrectionOutcome::Requeued { attempts }) => {
                    ctx.emit(RenderEventPayload::TaskRequeued { key, attempts })
                        .await;
                }
                Some(ResurrectionOutcome::DeadLettered { attempts }) => {
                    ctx.emit(RenderEventPayload::TaskDeadLettered {
                        key,
                        reason: format!("render failed {attempts} times"),
                    })
                    .await;
                }
                None => ctx.emit(RenderEventPayload::LeaseLost { key }).await,
            }
            return Ok(TaskOutcome::RenderFailed { outcome });
        }
    }

    let Some(count) = ctx.queue().resolve_and_count(key).await? else {
        tracing::warn!("lease was reclaimed before resolve; not counting");
        ctx.emit(RenderEventPayload::LeaseLost { key }).await;
        return Ok(TaskOutcome::LeaseLost);
    };
    ctx.emit(RenderEventPayload::TaskResolved {
        key,
        completed: count.completed,
    })
    .await;

    if !count.is_last() {
        return Ok(TaskOutcome::Completed {
            completed: count.completed,
            queued: count.queued,
        });
    }

    tracing::info!(completed = count.completed, "last task resolved; aggregating");
    finish_job(ctx, job_id).await
}

/// Aggregate a job whose counters met and mark it done.
///
/// A store error leaves the job's pending fan-in in place for the next
/// [`run_sweep`] to retry. A failed aggregation releases it and the job
/// stays pending.
async fn finish_job(ctx: &ServiceContext, job_id: JobId) -> Result<TaskOutcome> {
    match aggregator::aggregate(ctx, job_id).await {
        Ok(final_path) => {
            ctx.jobs().mark_done(job_id, &final_path).await?;
            ctx.emit(RenderEventPayload::JobAggregated {
                job_id,
                final_path: final_path.clone(),
            })
            .await;
            Ok(TaskOutcome::Aggregated { final_path })
        }
        Err(err) => {
            tracing::error!("{err}");
            ctx.emit(RenderEventPayload::AggregationFailed {
                job_id,
                error: err.to_string(),
            })
            .await;
            ctx.jobs().release_fan_in(job_id).await?;
            Ok(TaskOutcome::AggregationFailed {
                error: err.to_string(),
            })
        }
    }
}

/// Run one housekeeping pass at `now`.
///
/// Reclaims expired leases, then finishes every job whose fan-in has been
/// pending for longer than a lease TTL, i.e. whose finishing worker hit a
/// store error or died after counting the last task. Reports queue depths.
pub async fn run_sweep(ctx: &ServiceContext, now: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = ctx.scanner().scan_expired_leases(now).await?;
    telemetry::record_sweep(report.requeued.len(), report.dead_lettered.len(), report.adopted);

    for key in &report.requeued {
        tracing::info!(task = %key, "expired lease requeued");
    }
    for key in &report.dead_lettered {
        ctx.emit(RenderEventPayload::TaskDeadLettered {
            key: *key,
            reason: "lease expired".to_string(),
        })
        .await;
    }
    if report.reclaimed() > 0 || report.adopted > 0 {
        ctx.emit(RenderEventPayload::LeasesReclaimed {
            requeued: report.requeued.len(),
            dead_lettered: report.dead_lettered.len(),
            adopted: report.adopted,
        })
        .await;
    }

    let stale_before = now - ctx.queue_config().retry().lease_ttl();
    for job_id in ctx.jobs().claim_stale_fan_ins(stale_before, now).await? {
        tracing::warn!(job_id = %job_id, "fan-in stalled; finishing job");
        match finish_job(ctx, job_id).await {
            Ok(TaskOutcome::Aggregated { .. }) => report.recovered.push(job_id),
            Ok(_) => {}
            // Restamped by the claim; retried one TTL from now.
            Err(err) => tracing::warn!(job_id = %job_id, "fan-in retry failed: {err}"),
        }
    }

    let snapshot = ctx.queue().snapshot().await?;
    telemetry::set_queue_depth(snapshot.queued, snapshot.processing.len(), snapshot.dead);
    Ok(report)
}

/// Worker pool and housekeeper for one process.
pub struct WorkerRuntime {
    ctx: Arc<ServiceContext>,
    config: WorkerConfig,
    shutdown_token: ShutdownToken,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("WorkerRuntime")
            .field("config", &self.config)
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl WorkerRuntime {
    /// Runtime over `ctx`; nothing runs until the pool is spawned.
    pub fn new(ctx: Arc<ServiceContext>, config: WorkerConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown_token: ShutdownToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Shared context handed to every worker.
    pub fn context(&self) -> Arc<ServiceContext> {
        Arc::clone(&self.ctx)
    }

    /// Worker identity and parallelism.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Token that stops the pool and the housekeeper when cancelled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Spawn `config.parallelism` worker loops.
    pub async fn spawn_worker_pool(&self) {
        for i in 0..self.config.parallelism {
            let worker_id = self.config.loop_id(i);
            let ctx = Arc::clone(&self.ctx);
            let shutdown = self.shutdown_token.clone();

            let handle = tokio::spawn(async move {
                Self::worker_loop(worker_id, ctx, shutdown).await;
            });

            let mut handles = self.handles.lock().await;
            handles.push(handle);
        }
    }

    /// Spawn the periodic reclaim sweep.
    pub async fn spawn_housekeeper(&self) {
        let ctx = Arc::clone(&self.ctx);
        let interval = tokio::time::Duration::from_millis(
            self.ctx.queue_config().sweep_interval_ms,
        );
        let shutdown = self.shutdown_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = run_sweep(&ctx, Utc::now()).await {
                            tracing::warn!("housekeeper sweep error: {err}");
                        }
                    }
                }
            }
        });

        self.handles.lock().await.push(handle);
    }

    /// Gracefully shut down all workers and the housekeeper.
    ///
    /// A worker finishes the task it is processing; a worker waiting for a
    /// lease notices within one lease wait.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Initiating graceful shutdown of worker runtime");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(tokio::time::Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Worker task failed: {:?}", e),
                Err(_) => {
                    tracing::warn!("Worker task timed out during shutdown")
                }
            }
        }

        tracing::info!("Worker runtime shutdown complete");
        Ok(())
    }

    async fn worker_loop(worker_id: String, ctx: Arc<ServiceContext>, shutdown: ShutdownToken) {
        tracing::info!(worker_id = %worker_id, "worker started");
        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Worker {} shutting down", worker_id);
                break;
            }

            let leased = ctx
                .queue()
                .lease_next(&worker_id, ctx.lease_wait())
                .instrument(telemetry::lease_span(&worker_id))
                .await;

            match leased {
                Ok(Some(lease)) => {
                    let key = lease.key;
                    ctx.emit(RenderEventPayload::TaskLeased {
                        key,
                        lease_id: lease.lease_id,
                        worker_id: worker_id.clone(),
                    })
                    .await;

                    let span = telemetry::render_span(key, &worker_id);
                    match process_lease(&ctx, lease).instrument(span).await {
                        Ok(outcome) => {
                            telemetry::record_task_outcome(key, outcome.label());
                        }
                        Err(err) => {
                            tracing::warn!(task = %key, "task processing error: {err}");
                            tokio::time::sleep(ctx.store_error_backoff()).await;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("lease error: {err}");
                    tokio::time::sleep(ctx.store_error_backoff()).await;
                }
            }
        }
    }
}
