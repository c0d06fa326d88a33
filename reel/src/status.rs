//! Read-only job status projection.

use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;
use crate::error::{ReelError, Result};
use crate::job::{JobId, JobStatus};

/// What a poller sees for a job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    /// `Pending` until the final artifact is published.
    pub status: JobStatus,
    /// Public location of the final artifact; empty while pending.
    pub final_url: String,
}

/// Task counters of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Tasks allocated by the dispatcher.
    pub queued: u64,
    /// Tasks resolved by workers.
    pub completed: u64,
}

impl JobProgress {
    /// Every allocated task has been resolved.
    pub fn is_complete(&self) -> bool {
        self.queued > 0 && self.completed >= self.queued
    }
}

/// Current status of a job, `NotFound` for unknown IDs.
pub async fn get_job(ctx: &ServiceContext, job_id: JobId) -> Result<JobView> {
    let record = ctx
        .jobs()
        .get_job(job_id)
        .await?
        .ok_or_else(|| ReelError::NotFound(job_id.to_string()))?;

    Ok(JobView {
        status: record.status,
        final_url: record.final_path,
    })
}

/// [`get_job`] for the boundary string form of the ID.
pub async fn get_job_str(ctx: &ServiceContext, raw: &str) -> Result<JobView> {
    let job_id: JobId = raw.parse()?;
    get_job(ctx, job_id).await
}

/// Queued and completed task counts, `NotFound` for unknown IDs.
pub async fn job_progress(ctx: &ServiceContext, job_id: JobId) -> Result<JobProgress> {
    if ctx.jobs().get_job(job_id).await?.is_none() {
        return Err(ReelError::NotFound(job_id.to_string()));
    }
    Ok(JobProgress {
        queued: ctx.jobs().queued_count(job_id).await?,
        completed: ctx.jobs().completed_count(job_id).await?,
    })
}
