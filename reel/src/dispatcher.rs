//! Fan-out: one job request becomes N frame tasks.

use tracing::Instrument;

use crate::context::ServiceContext;
use crate::error::{ReelError, Result};
use crate::events::RenderEventPayload;
use crate::job::{JobId, Product, RenderTask, TaskKey};
use crate::telemetry;

/// Create a job, stage its scene and enqueue one task per frame.
///
/// Scene assets are staged before any task exists, so a staging failure
/// leaves a pending job with nothing queued. All task IDs are allocated
/// before the first entry is enqueued, so no worker can see the completed
/// count catch up with a queued count that is still growing. Returns as
/// soon as every entry is enqueued; store errors are surfaced to the caller.
pub async fn start_job(
    ctx: &ServiceContext,
    caption: &str,
    product: Product,
) -> Result<JobId> {
    let span = telemetry::dispatch_span(caption, product.slug());
    async move {
        let job_id = ctx.jobs().create_job().await?;
        tracing::Span::current().record("job_id", tracing::field::display(job_id));

        ctx.stager()
            .stage(ctx.bucket(), job_id, caption, product)
            .await
            .map_err(|source| ReelError::Stage { job_id, source })?;
        tracing::debug!("scene staged");

        let frames = ctx.render_config().frames_per_job;
        let mut tasks = Vec::with_capacity(frames as usize);
        for frame in 0..frames {
            let task_id = ctx.jobs().increment_queued(job_id).await?;
            tasks.push((TaskKey::new(job_id, task_id), frame));
        }

        for (key, frame) in &tasks {
            let task = RenderTask {
                frame: *frame,
                caption: caption.to_string(),
                product,
            };
            let payload = task.encode().map_err(|e| ReelError::Encode {
                key: *key,
                reason: e.to_string(),
            })?;
            ctx.queue().enqueue(*key, payload).await?;
            ctx.emit(RenderEventPayload::TaskEnqueued { key: *key }).await;
        }

        let count = tasks.len() as u64;
        telemetry::record_job_started(job_id, count);
        ctx.emit(RenderEventPayload::JobCreated {
            job_id,
            tasks: count,
        })
        .await;
        Ok(job_id)
    }
    .instrument(span)
    .await
}
