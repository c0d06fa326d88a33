use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobId, TaskKey};

/// Unique identifier for a single lease of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    /// Create a new lease ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task moved from `queued` to `processing` on behalf of one worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskLease {
    /// Queue entry that was leased.
    pub key: TaskKey,
    /// Identifier of this particular lease.
    pub lease_id: LeaseId,
    /// Raw task payload, decoded by the worker.
    pub payload: Vec<u8>,
    /// Worker holding the lease.
    pub worker_id: String,
    /// When the entry entered `processing`.
    pub leased_at: DateTime<Utc>,
    /// After this instant the sweep may reclaim the entry.
    pub expires_at: DateTime<Utc>,
    /// Failed or reclaimed attempts recorded before this lease.
    pub attempts: u32,
}

impl TaskLease {
    /// Creates a lease starting now.
    pub fn new(
        key: TaskKey,
        payload: Vec<u8>,
        worker_id: impl Into<String>,
        lease_ttl: Duration,
        attempts: u32,
    ) -> Self {
        let leased_at = Utc::now();
        Self {
            key,
            lease_id: LeaseId::new(),
            payload,
            worker_id: worker_id.into(),
            leased_at,
            expires_at: leased_at + lease_ttl,
            attempts,
        }
    }

    /// Checks if the lease has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Configuration for lease reclamation and retry limits.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaseRetryConfig {
    /// Attempts (failures plus reclaims) before a task is dead-lettered.
    pub max_attempts: u32,
    /// Lease time-to-live.
    pub lease_ttl_secs: i64,
}

impl Default for LeaseRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lease_ttl_secs: 300,
        }
    }
}

impl LeaseRetryConfig {
    /// Lease TTL as a chrono duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs)
    }
}

/// Determines if a task should be dead-lettered based on attempt count.
///
/// Returns true when attempts >= max_attempts.
pub fn should_dead_letter(attempts: u32, max_attempts: u32) -> bool {
    attempts >= max_attempts
}

/// Where a task went after a failed or expired lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResurrectionOutcome {
    /// Pushed back onto `queued`.
    Requeued {
        /// Attempts recorded so far, including this one.
        attempts: u32,
    },
    /// Moved to the dead-letter list.
    DeadLettered {
        /// Attempts recorded so far, including this one.
        attempts: u32,
    },
}

/// Decides the fate of a task whose lease failed or expired.
///
/// `current_attempts` is the count before this failure.
pub fn process_expired_lease(
    current_attempts: u32,
    config: &LeaseRetryConfig,
) -> ResurrectionOutcome {
    let attempts = current_attempts.saturating_add(1);

    if should_dead_letter(attempts, config.max_attempts) {
        ResurrectionOutcome::DeadLettered { attempts }
    } else {
        ResurrectionOutcome::Requeued { attempts }
    }
}

/// Result of one reclaim sweep.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Entries moved back to `queued`.
    pub requeued: Vec<TaskKey>,
    /// Entries moved to `dead`.
    pub dead_lettered: Vec<TaskKey>,
    /// `processing` entries that had no lease record and were given one.
    pub adopted: usize,
    /// Jobs whose stalled fan-in was finished by this sweep.
    #[serde(default)]
    pub recovered: Vec<JobId>,
}

impl SweepReport {
    /// Number of entries that left `processing`.
    pub fn reclaimed(&self) -> usize {
        self.requeued.len() + self.dead_lettered.len()
    }

    pub(crate) fn record(&mut self, key: TaskKey, outcome: ResurrectionOutcome) {
        match outcome {
            ResurrectionOutcome::Requeued { .. } => self.requeued.push(key),
            ResurrectionOutcome::DeadLettered { .. } => {
                self.dead_lettered.push(key)
            }
        }
    }
}
