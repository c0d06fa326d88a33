use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reel::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Store operation a fault can be injected into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreOp {
    CreateJob,
    GetJob,
    MarkDone,
    IncrementQueued,
    IncrementCompleted,
    QueuedCount,
    CompletedCount,
    ClaimStaleFanIns,
    ReleaseFanIn,
    Enqueue,
    LeaseNext,
    Resolve,
    ResolveAndCount,
    Fail,
    DeadLetter,
    Snapshot,
    ScanExpiredLeases,
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    /// Fail without touching the store.
    Reject,
    /// Apply the operation, then report failure.
    LoseReply,
}

/// [`MemoryStore`] wrapper that fails chosen operations on demand.
#[derive(Clone)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    faults: Arc<Mutex<HashMap<StoreOp, VecDeque<Fault>>>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The next call to `op` fails before reaching the store.
    pub fn fail_next(&self, op: StoreOp) {
        self.push(op, Fault::Reject);
    }

    /// The next call to `op` is applied but returns an error.
    pub fn lose_next_reply(&self, op: StoreOp) {
        self.push(op, Fault::LoseReply);
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    fn push(&self, op: StoreOp, fault: Fault) {
        self.faults.lock().entry(op).or_default().push_back(fault);
    }

    fn take(&self, op: StoreOp) -> Option<Fault> {
        self.faults.lock().get_mut(&op).and_then(VecDeque::pop_front)
    }

    async fn run<T, F>(&self, op: StoreOp, call: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        let injected = || StoreError::Backend(format!("injected {op:?} failure"));
        match self.take(op) {
            Some(Fault::Reject) => Err(injected()),
            Some(Fault::LoseReply) => {
                call.await?;
                Err(injected())
            }
            None => call.await,
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self) -> Result<JobId, StoreError> {
        self.run(StoreOp::CreateJob, self.inner.create_job()).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.run(StoreOp::GetJob, self.inner.get_job(job_id)).await
    }

    async fn mark_done(&self, job_id: JobId, final_path: &str) -> Result<(), StoreError> {
        self.run(StoreOp::MarkDone, self.inner.mark_done(job_id, final_path))
            .await
    }

    async fn increment_queued(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.run(StoreOp::IncrementQueued, self.inner.increment_queued(job_id))
            .await
    }

    async fn increment_completed(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.run(StoreOp::IncrementCompleted, self.inner.increment_completed(job_id))
            .await
    }

    async fn queued_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.run(StoreOp::QueuedCount, self.inner.queued_count(job_id))
            .await
    }

    async fn completed_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        self.run(StoreOp::CompletedCount, self.inner.completed_count(job_id))
            .await
    }

    async fn claim_stale_fan_ins(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        self.run(
            StoreOp::ClaimStaleFanIns,
            self.inner.claim_stale_fan_ins(stale_before, now),
        )
        .await
    }

    async fn release_fan_in(&self, job_id: JobId) -> Result<(), StoreError> {
        self.run(StoreOp::ReleaseFanIn, self.inner.release_fan_in(job_id))
            .await
    }
}

#[async_trait]
impl TaskQueue for FlakyStore {
    async fn enqueue(&self, key: TaskKey, payload: Vec<u8>) -> Result<(), StoreError> {
        self.run(StoreOp::Enqueue, self.inner.enqueue(key, payload))
            .await
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        wait: Duration,
    ) -> Result<Option<TaskLease>, StoreError> {
        self.run(StoreOp::LeaseNext, self.inner.lease_next(worker_id, wait))
            .await
    }

    async fn resolve(&self, key: TaskKey) -> Result<bool, StoreError> {
        self.run(StoreOp::Resolve, self.inner.resolve(key)).await
    }

    async fn resolve_and_count(&self, key: TaskKey) -> Result<Option<FanInCount>, StoreError> {
        self.run(StoreOp::ResolveAndCount, self.inner.resolve_and_count(key))
            .await
    }

    async fn fail(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<Option<ResurrectionOutcome>, StoreError> {
        self.run(StoreOp::Fail, self.inner.fail(key, error)).await
    }

    async fn dead_letter(&self, key: TaskKey, error: Option<String>) -> Result<bool, StoreError> {
        self.run(StoreOp::DeadLetter, self.inner.dead_letter(key, error))
            .await
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        self.run(StoreOp::Snapshot, self.inner.snapshot()).await
    }
}

#[async_trait]
impl LeaseExpiryScanner for FlakyStore {
    fn retry_config(&self) -> LeaseRetryConfig {
        self.inner.retry_config()
    }

    async fn scan_expired_leases(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        self.run(StoreOp::ScanExpiredLeases, self.inner.scan_expired_leases(now))
            .await
    }
}
