use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{JobId, TaskKey};
use crate::lease::LeaseId;

/// Metadata envelope attached to every render event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta<E> {
    /// Envelope format version.
    pub version: u16,
    /// Groups the events of one operation.
    pub correlation_id: Uuid,
    /// Stable key for deduplicating redelivered events.
    pub idempotency_key: String,
    /// What the event is about.
    pub entity_id: E,
    pub timestamp: DateTime<Utc>,
}

impl<E> EventMeta<E> {
    /// Stamp a new envelope; a fresh v7 correlation ID when none is given.
    pub fn new(
        entity_id: E,
        correlation_id: Option<Uuid>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            version: 1,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            idempotency_key: idempotency_key.into(),
            entity_id,
            timestamp: Utc::now(),
        }
    }
}

/// What an event is about.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventScope {
    /// A single job and its tasks.
    Job(JobId),
    /// The shared queue as a whole.
    Queue,
}

/// Render event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderEvent {
    /// Envelope.
    pub meta: EventMeta<EventScope>,
    /// The transition itself.
    pub payload: RenderEventPayload,
}

impl RenderEvent {
    /// Event scoped to the job owning `payload`, or to the queue.
    pub fn new(payload: RenderEventPayload) -> Self {
        let scope = payload
            .job_id()
            .map(EventScope::Job)
            .unwrap_or(EventScope::Queue);
        let key = payload.idempotency_key();
        Self {
            meta: EventMeta::new(scope, None, key),
            payload,
        }
    }
}

/// Event payload emitted for job and task transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RenderEventPayload {
    /// Job record created and all tasks enqueued.
    JobCreated { job_id: JobId, tasks: u64 },
    /// A task entered `queued`.
    TaskEnqueued { key: TaskKey },
    /// A task moved to `processing` under a lease.
    TaskLeased {
        key: TaskKey,
        lease_id: LeaseId,
        worker_id: String,
    },
    /// A task finished and was counted.
    TaskResolved { key: TaskKey, completed: u64 },
    /// The renderer failed for a task.
    TaskFailed { key: TaskKey, error: String },
    /// A task went back to `queued`.
    TaskRequeued { key: TaskKey, attempts: u32 },
    /// A task was moved to `dead`.
    TaskDeadLettered { key: TaskKey, reason: String },
    /// A worker finished a task whose lease had already been reclaimed.
    LeaseLost { key: TaskKey },
    /// The final artifact was published and the job marked done.
    JobAggregated { job_id: JobId, final_path: String },
    /// Aggregation failed; the job stays pending.
    AggregationFailed { job_id: JobId, error: String },
    /// A reclaim sweep moved entries out of `processing`.
    LeasesReclaimed {
        requeued: usize,
        dead_lettered: usize,
        adopted: usize,
    },
}

impl RenderEventPayload {
    /// Job the event belongs to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobAggregated { job_id, .. }
            | Self::AggregationFailed { job_id, .. } => Some(*job_id),
            Self::TaskEnqueued { key }
            | Self::TaskLeased { key, .. }
            | Self::TaskResolved { key, .. }
            | Self::TaskFailed { key, .. }
            | Self::TaskRequeued { key, .. }
            | Self::TaskDeadLettered { key, .. }
            | Self::LeaseLost { key } => Some(key.job_id),
            Self::LeasesReclaimed { .. } => None,
        }
    }

    /// Short, stable name of the payload variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::TaskEnqueued { .. } => "task_enqueued",
            Self::TaskLeased { .. } => "task_leased",
            Self::TaskResolved { .. } => "task_resolved",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRequeued { .. } => "task_requeued",
            Self::TaskDeadLettered { .. } => "task_dead_lettered",
            Self::LeaseLost { .. } => "lease_lost",
            Self::JobAggregated { .. } => "job_aggregated",
            Self::AggregationFailed { .. } => "aggregation_failed",
            Self::LeasesReclaimed { .. } => "leases_reclaimed",
        }
    }

    fn idempotency_key(&self) -> String {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::JobAggregated { job_id, .. }
            | Self::AggregationFailed { job_id, .. } => {
                format!("{}-{job_id}", self.kind())
            }
            Self::TaskLeased { lease_id, .. } => {
                format!("{}-{lease_id}", self.kind())
            }
            Self::TaskRequeued { key, attempts } => {
                format!("{}-{key}-{attempts}", self.kind())
            }
            Self::TaskEnqueued { key }
            | Self::TaskResolved { key, .. }
            | Self::TaskFailed { key, .. }
            | Self::TaskDeadLettered { key, .. }
            | Self::LeaseLost { key } => format!("{}-{key}", self.kind()),
            Self::LeasesReclaimed { .. } => {
                format!("{}-{}", self.kind(), Uuid::now_v7())
            }
        }
    }
}

/// Trait for publishing render events.
#[async_trait]
pub trait RenderEventPublisher: Send + Sync {
    /// Publish an event to all subscribers.
    async fn publish(&self, event: RenderEvent) -> anyhow::Result<()>;
    /// Subscribe to events published from now on.
    fn subscribe(&self) -> broadcast::Receiver<RenderEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Publishing never waits for slow subscribers; a subscriber that falls
/// more than `capacity` events behind receives `RecvError::Lagged`.
pub struct InProcEventBus {
    sender: broadcast::Sender<RenderEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InProcEventBus {
    /// Bus retaining up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl RenderEventPublisher for InProcEventBus {
    async fn publish(&self, event: RenderEvent) -> anyhow::Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn enqueued(task_id: u64) -> RenderEvent {
        RenderEvent::new(RenderEventPayload::TaskEnqueued {
            key: TaskKey::new(JobId(1), task_id),
        })
    }

    #[tokio::test]
    async fn test_event_bus_broadcast_to_multiple_subscribers() {
        let bus = InProcEventBus::new(100);

        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for i in 1..=5 {
            bus.publish(enqueued(i)).await.unwrap();
        }

        for i in 1..=5 {
            let a = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let b = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(a.meta.idempotency_key, format!("task_enqueued-1_{i}"));
            assert_eq!(b.meta.idempotency_key, a.meta.idempotency_key);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = InProcEventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(enqueued(i)).await.unwrap();
        }

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        match result.unwrap() {
            Err(broadcast::error::RecvError::Lagged(_)) | Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => {
                panic!("Channel should not be closed");
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InProcEventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(enqueued(1)).await.unwrap();
    }

    #[test]
    fn test_event_scope() {
        let job = RenderEvent::new(RenderEventPayload::JobAggregated {
            job_id: JobId(9),
            final_path: "b/out.9/animated.gif".into(),
        });
        assert_eq!(job.meta.entity_id, EventScope::Job(JobId(9)));
        assert_eq!(job.meta.version, 1);

        let sweep = RenderEvent::new(RenderEventPayload::LeasesReclaimed {
            requeued: 1,
            dead_lettered: 0,
            adopted: 0,
        });
        assert_eq!(sweep.meta.entity_id, EventScope::Queue);
        assert_eq!(sweep.payload.kind(), "leases_reclaimed");
    }

    #[test]
    fn test_event_bus_debug_format() {
        let bus = InProcEventBus::new(100);
        let _rx = bus.subscribe();
        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("InProcEventBus"));
        assert!(debug_str.contains("subscribers: 1"));
        assert!(debug_str.contains("capacity: 100"));
    }
}
