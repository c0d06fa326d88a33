use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StoreError;
use crate::job::TaskKey;
use crate::lease::{
    LeaseRetryConfig, ResurrectionOutcome, SweepReport, TaskLease,
};

/// Trait for the list-based task queue with a two-phase leased state.
///
/// Every entry lives in exactly one of `queued`, `processing` or `dead`
/// from enqueue until it is resolved. Implementors must make each
/// transition a single atomic operation on the backing store.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist the payload and append the key to `queued`.
    async fn enqueue(
        &self,
        key: TaskKey,
        payload: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Move the head of `queued` to `processing` and return it.
    ///
    /// Suspends the caller until an entry is available or `wait` elapses,
    /// in which case `None` is returned. Concurrent callers never receive
    /// the same entry.
    async fn lease_next(
        &self,
        worker_id: &str,
        wait: Duration,
    ) -> Result<Option<TaskLease>, StoreError>;

    /// Remove a finished entry from `processing`.
    ///
    /// Returns `false` when the entry was no longer in `processing`, i.e.
    /// the lease was reclaimed by a sweep and someone else owns the task.
    async fn resolve(&self, key: TaskKey) -> Result<bool, StoreError>;

    /// Resolve an entry and count it against its job in one transaction.
    ///
    /// Removes the entry from `processing`, bumps the job's completed
    /// counter and reads its queued counter. When the two become equal the
    /// job is also recorded as a pending fan-in, which stays until
    /// [`JobStore::mark_done`](crate::store::JobStore::mark_done) or
    /// [`JobStore::release_fan_in`](crate::store::JobStore::release_fan_in)
    /// clears it. Returns `None`, touching nothing, when the entry was no
    /// longer in `processing`.
    async fn resolve_and_count(
        &self,
        key: TaskKey,
    ) -> Result<Option<FanInCount>, StoreError>;

    /// Record a failed attempt and requeue or dead-letter the entry.
    ///
    /// Requeued entries go to the head of `queued`. Returns `None` when the
    /// entry was no longer in `processing`.
    async fn fail(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<Option<ResurrectionOutcome>, StoreError>;

    /// Move an entry from `processing` straight to `dead`.
    ///
    /// Returns `false` when the entry was no longer in `processing`.
    async fn dead_letter(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Current depths and in-flight entries.
    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError>;
}

/// Trait for scanning and handling expired leases.
///
/// Implementors move `processing` entries whose lease expired before `now`
/// back to `queued`, or to `dead` once their attempts are exhausted.
#[async_trait]
pub trait LeaseExpiryScanner: Send + Sync {
    /// Attempt limit and lease TTL applied by this backend.
    fn retry_config(&self) -> LeaseRetryConfig;

    /// Scan for and process expired leases.
    async fn scan_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, StoreError>;
}

/// Job counters observed by [`TaskQueue::resolve_and_count`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FanInCount {
    /// Completed counter after this resolve.
    pub completed: u64,
    /// Queued counter at the time of the resolve.
    pub queued: u64,
}

impl FanInCount {
    /// Whether this resolve completed the job's last task.
    pub fn is_last(&self) -> bool {
        self.completed == self.queued
    }
}

/// Snapshot of queue state at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Number of entries waiting to be leased.
    pub queued: usize,
    /// Entries currently leased, oldest lease first.
    pub processing: Vec<TaskKey>,
    /// Number of dead-lettered entries.
    pub dead: usize,
}

impl QueueSnapshot {
    /// Create an empty snapshot at the given time.
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            queued: 0,
            processing: Vec::new(),
            dead: 0,
        }
    }

    /// Total number of live entries.
    pub fn total(&self) -> usize {
        self.queued + self.processing.len() + self.dead
    }
}
