//! Fan-in: compile a finished job's frames into the final artifact.

use std::time::Instant;

use tracing::Instrument;

use crate::artifact::ObjectRef;
use crate::compiler::FINAL_ARTIFACT_NAME;
use crate::context::ServiceContext;
use crate::error::{CompileError, ReelError, Result};
use crate::job::JobId;
use crate::render::output_prefix;
use crate::telemetry;

const FRAME_PREFIX: &str = "frame_";

/// Object the final artifact of `job_id` is written to.
pub fn final_artifact(ctx: &ServiceContext, job_id: JobId) -> ObjectRef {
    ctx.bucket()
        .object(format!("{}/{FINAL_ARTIFACT_NAME}", output_prefix(job_id)))
}

/// List a job's frames in frame order.
///
/// The store's listing order is ignored; frames are always re-sorted by
/// name, which equals frame order thanks to zero-padded indices.
pub async fn ordered_frames(
    ctx: &ServiceContext,
    job_id: JobId,
) -> Result<Vec<ObjectRef>, CompileError> {
    let prefix = format!("{}/", output_prefix(job_id));
    let mut frames: Vec<ObjectRef> = ctx
        .artifacts()
        .list(ctx.bucket(), &prefix)
        .await?
        .into_iter()
        .filter(|obj| obj.file_name().starts_with(FRAME_PREFIX))
        .collect();
    frames.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(frames)
}

/// Compile and publish the final artifact, returning its public location.
///
/// Any failure aborts the aggregation; the caller leaves the job pending.
pub async fn aggregate(ctx: &ServiceContext, job_id: JobId) -> Result<String> {
    let started = Instant::now();
    let result = run(ctx, job_id)
        .instrument(telemetry::aggregate_span(job_id))
        .await;
    telemetry::record_aggregation(job_id, result.is_ok(), started.elapsed().as_secs_f64());
    result.map_err(|source| ReelError::Aggregation { job_id, source })
}

async fn run(ctx: &ServiceContext, job_id: JobId) -> Result<String, CompileError> {
    let frames = ordered_frames(ctx, job_id).await?;
    if frames.is_empty() {
        return Err(CompileError::NoFrames(job_id));
    }
    tracing::debug!(frames = frames.len(), "compiling frames");

    let output = final_artifact(ctx, job_id);
    ctx.compiler().compile(job_id, &frames, &output).await?;

    if ctx.render_config().public_output {
        ctx.artifacts().make_public(&output).await?;
    }
    Ok(ctx.artifacts().public_location(&output))
}
