use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::job::{JobId, JobRecord, TaskKey};
use crate::lease::{
    LeaseRetryConfig, ResurrectionOutcome, SweepReport, TaskLease,
    process_expired_lease,
};
use crate::queue::{FanInCount, LeaseExpiryScanner, QueueSnapshot, TaskQueue};
use crate::store::JobStore;

#[derive(Debug, Default)]
struct JobEntry {
    record: JobRecord,
    queued: u64,
    completed: u64,
}

#[derive(Debug)]
struct LeaseRecord {
    worker_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_job_id: u64,
    jobs: HashMap<JobId, JobEntry>,
    payloads: HashMap<TaskKey, Vec<u8>>,
    /// Front is the next entry to lease.
    queued: VecDeque<TaskKey>,
    /// Oldest lease first.
    processing: Vec<TaskKey>,
    leases: HashMap<TaskKey, LeaseRecord>,
    attempts: HashMap<TaskKey, u32>,
    dead: Vec<TaskKey>,
    last_errors: HashMap<TaskKey, String>,
    /// Jobs whose counters met, with the time the marker was last stamped.
    fan_ins: HashMap<JobId, DateTime<Utc>>,
}

impl MemoryState {
    fn take_processing(&mut self, key: TaskKey) -> bool {
        match self.processing.iter().position(|k| *k == key) {
            Some(idx) => {
                self.processing.remove(idx);
                self.leases.remove(&key);
                true
            }
            None => false,
        }
    }

    fn forget(&mut self, key: TaskKey) {
        self.payloads.remove(&key);
        self.attempts.remove(&key);
        self.last_errors.remove(&key);
    }

    fn retire(
        &mut self,
        key: TaskKey,
        retry: &LeaseRetryConfig,
    ) -> ResurrectionOutcome {
        let current = self.attempts.get(&key).copied().unwrap_or(0);
        let outcome = process_expired_lease(current, retry);
        match outcome {
            ResurrectionOutcome::Requeued { attempts } => {
                self.attempts.insert(key, attempts);
                self.queued.push_front(key);
            }
            ResurrectionOutcome::DeadLettered { attempts } => {
                self.attempts.insert(key, attempts);
                self.dead.push(key);
            }
        }
        outcome
    }
}

/// In-process job store and task queue.
///
/// All state lives behind one mutex, so every operation is atomic with
/// respect to every other. Waiting lessees park on a [`Notify`] that is
/// signalled once per entry pushed onto `queued`.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<Notify>,
    retry: LeaseRetryConfig,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(LeaseRetryConfig::default())
    }
}

impl MemoryStore {
    /// Empty store applying `retry` to failures and expired leases.
    pub fn new(retry: LeaseRetryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(Notify::new()),
            retry,
        }
    }

    /// Last recorded failure for a task, if any.
    pub fn last_error(&self, key: TaskKey) -> Option<String> {
        self.state.lock().last_errors.get(&key).cloned()
    }

    /// Keys currently in the dead-letter list, oldest first.
    pub fn dead_letters(&self) -> Vec<TaskKey> {
        self.state.lock().dead.clone()
    }

    /// Jobs currently awaiting fan-in.
    pub fn pending_fan_ins(&self) -> Vec<JobId> {
        let mut jobs: Vec<JobId> = self.state.lock().fan_ins.keys().copied().collect();
        jobs.sort();
        jobs
    }

    fn try_lease(&self, worker_id: &str) -> Result<Option<TaskLease>, StoreError> {
        let mut state = self.state.lock();
        let Some(key) = state.queued.pop_front() else {
            return Ok(None);
        };

        let Some(payload) = state.payloads.get(&key).cloned() else {
            // Park it in dead so it stays inspectable.
            state.dead.push(key);
            return Err(StoreError::corrupt(
                format!("task:{key}"),
                "queued entry has no payload",
            ));
        };

        let attempts = state.attempts.get(&key).copied().unwrap_or(0);
        let lease = TaskLease::new(key, payload, worker_id, self.retry.lease_ttl(), attempts);
        state.processing.push(key);
        state.leases.insert(
            key,
            LeaseRecord {
                worker_id: worker_id.to_string(),
                expires_at: lease.expires_at,
            },
        );
        Ok(Some(lease))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self) -> Result<JobId, StoreError> {
        let mut state = self.state.lock();
        state.last_job_id += 1;
        let job_id = JobId(state.last_job_id);
        state.jobs.insert(job_id, JobEntry::default());
        Ok(job_id)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .get(&job_id)
            .map(|entry| entry.record.clone()))
    }

    async fn mark_done(
        &self,
        job_id: JobId,
        final_path: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let entry = state.jobs.entry(job_id).or_default();
        entry.record = JobRecord::done(final_path);
        state.fan_ins.remove(&job_id);
        Ok(())
    }

    async fn increment_queued(&self, job_id: JobId) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let entry = state.jobs.entry(job_id).or_default();
        entry.queued += 1;
        Ok(entry.queued)
    }

    async fn increment_completed(
        &self,
        job_id: JobId,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let entry = state.jobs.entry(job_id).or_default();
        entry.completed += 1;
        Ok(entry.completed)
    }

    async fn queued_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        Ok(self.state.lock().jobs.get(&job_id).map_or(0, |e| e.queued))
    }

    async fn completed_count(&self, job_id: JobId) -> Result<u64, StoreError> {
        Ok(self.state.lock().jobs.get(&job_id).map_or(0, |e| e.completed))
    }

    async fn claim_stale_fan_ins(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut state = self.state.lock();
        let mut claimed = Vec::new();
        for (job_id, stamped_at) in state.fan_ins.iter_mut() {
            if *stamped_at < stale_before {
                *stamped_at = now;
                claimed.push(*job_id);
            }
        }
        claimed.sort();
        Ok(claimed)
    }

    async fn release_fan_in(&self, job_id: JobId) -> Result<(), StoreError> {
        self.state.lock().fan_ins.remove(&job_id);
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryStore {
    async fn enqueue(
        &self,
        key: TaskKey,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock();
            state.payloads.insert(key, payload);
            state.queued.push_back(key);
        }
        self.available.notify_one();
        Ok(())
    }

    async fn lease_next(
        &self,
        worker_id: &str,
        wait: Duration,
    ) -> Result<Option<TaskLease>, StoreError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_lease(worker_id)? {
                debug!(task = %lease.key, worker_id, "leased task");
                return Ok(Some(lease));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn resolve(&self, key: TaskKey) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        if !state.take_processing(key) {
            return Ok(false);
        }
        state.forget(key);
        Ok(true)
    }

    async fn resolve_and_count(
        &self,
        key: TaskKey,
    ) -> Result<Option<FanInCount>, StoreError> {
        let mut state = self.state.lock();
        if !state.take_processing(key) {
            return Ok(None);
        }
        state.forget(key);

        let entry = state.jobs.entry(key.job_id).or_default();
        entry.completed += 1;
        let count = FanInCount {
            completed: entry.completed,
            queued: entry.queued,
        };
        if count.is_last() {
            state.fan_ins.insert(key.job_id, Utc::now());
        }
        Ok(Some(count))
    }

    async fn fail(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<Option<ResurrectionOutcome>, StoreError> {
        let outcome = {
            let mut state = self.state.lock();
            if !state.take_processing(key) {
                return Ok(None);
            }
            if let Some(error) = error {
                state.last_errors.insert(key, error);
            }
            state.retire(key, &self.retry)
        };

        if matches!(outcome, ResurrectionOutcome::Requeued { .. }) {
            self.available.notify_one();
        }
        Ok(Some(outcome))
    }

    async fn dead_letter(
        &self,
        key: TaskKey,
        error: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        if !state.take_processing(key) {
            return Ok(false);
        }
        if let Some(error) = error {
            state.last_errors.insert(key, error);
        }
        state.dead.push(key);
        Ok(true)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let state = self.state.lock();
        let mut snapshot = QueueSnapshot::new(Utc::now());
        snapshot.queued = state.queued.len();
        snapshot.processing = state.processing.clone();
        snapshot.dead = state.dead.len();
        Ok(snapshot)
    }
}

#[async_trait]
impl LeaseExpiryScanner for MemoryStore {
    fn retry_config(&self) -> LeaseRetryConfig {
        self.retry.clone()
    }

    async fn scan_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();
        {
            let mut state = self.state.lock();
            let ttl = self.retry.lease_ttl();

            let in_flight = state.processing.clone();
            for key in in_flight {
                let lease = state
                    .leases
                    .get(&key)
                    .map(|l| (l.expires_at, l.worker_id.clone()));
                match lease {
                    Some((expires_at, worker_id)) if expires_at < now => {
                        warn!(task = %key, worker_id = %worker_id, "lease expired");
                        state.take_processing(key);
                        state
                            .last_errors
                            .entry(key)
                            .or_insert_with(|| "lease expired".to_string());
                        let outcome = state.retire(key, &self.retry);
                        report.record(key, outcome);
                    }
                    Some(_) => {}
                    None => {
                        state.leases.insert(
                            key,
                            LeaseRecord {
                                worker_id: String::new(),
                                expires_at: now + ttl,
                            },
                        );
                        report.adopted += 1;
                    }
                }
            }
        }

        for _ in 0..report.requeued.len() {
            self.available.notify_one();
        }
        Ok(report)
    }
}
