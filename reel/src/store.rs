use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{JobId, JobRecord};

/// Persistent job records and per-job atomic counters.
///
/// Counter operations return the post-increment value so callers can tell
/// "I was the Nth" without a separate read; two increments of the same
/// counter never return the same value.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate a fresh, monotonically increasing ID and persist a
    /// `Pending` record with zero counters.
    async fn create_job(&self) -> Result<JobId, StoreError>;

    /// Fetch a job record, `None` when the ID is unknown.
    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Set status to `Done` with the final artifact location.
    ///
    /// Clears the job's pending fan-in in the same write.
    async fn mark_done(
        &self,
        job_id: JobId,
        final_path: &str,
    ) -> Result<(), StoreError>;

    /// Bump the queued counter, returning the new value.
    async fn increment_queued(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// Bump the completed counter, returning the new value.
    async fn increment_completed(
        &self,
        job_id: JobId,
    ) -> Result<u64, StoreError>;

    /// Current queued counter (zero for unknown jobs).
    async fn queued_count(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// Current completed counter (zero for unknown jobs).
    async fn completed_count(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// Claim jobs whose fan-in was recorded before `stale_before` and has
    /// not been finished.
    ///
    /// Each claimed marker is restamped with `now`, so concurrent sweeps
    /// never claim the same job in the same window.
    async fn claim_stale_fan_ins(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError>;

    /// Drop a job's pending fan-in without marking it done.
    async fn release_fan_in(&self, job_id: JobId) -> Result<(), StoreError>;
}
