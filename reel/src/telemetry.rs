//! Tracing spans and lifecycle recording helpers.
//!
//! Every `record_*` function logs through `tracing` and, with the `metrics`
//! feature, updates the matching Prometheus series in [`crate::metrics`].

use tracing::{Span, info_span};

use crate::job::{JobId, TaskKey};

/// Span around `start_job`.
#[must_use]
pub fn dispatch_span(caption: &str, product: impl AsRef<str>) -> Span {
    info_span!(
        "reel.dispatch",
        caption = %caption,
        product = %product.as_ref(),
        job_id = tracing::field::Empty,
    )
}

/// Span around one lease attempt by a worker loop.
#[must_use]
pub fn lease_span(worker_id: &str) -> Span {
    info_span!("reel.lease", worker_id = %worker_id)
}

/// Span around rendering and resolving one task.
#[must_use]
pub fn render_span(key: TaskKey, worker_id: &str) -> Span {
    info_span!(
        "reel.render",
        job_id = %key.job_id,
        task_id = key.task_id,
        worker_id = %worker_id,
    )
}

/// Span around aggregating a job.
#[must_use]
pub fn aggregate_span(job_id: JobId) -> Span {
    info_span!("reel.aggregate", job_id = %job_id)
}

/// Record that a job fanned out into `tasks` tasks.
pub fn record_job_started(job_id: JobId, tasks: u64) {
    tracing::info!(job_id = %job_id, tasks, "job started");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_started(tasks);
}

/// Record the terminal state of one task attempt.
///
/// `outcome` is one of `resolved`, `requeued`, `dead_lettered`, `lost`.
pub fn record_task_outcome(key: TaskKey, outcome: &str) {
    tracing::info!(job_id = %key.job_id, task_id = key.task_id, outcome, "task finished");

    #[cfg(feature = "metrics")]
    crate::metrics::record_task_outcome(outcome);
}

/// Record a finished aggregation.
pub fn record_aggregation(job_id: JobId, success: bool, duration_secs: f64) {
    if success {
        tracing::info!(job_id = %job_id, duration_secs, "job aggregated");
    } else {
        tracing::warn!(job_id = %job_id, duration_secs, "aggregation failed");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::observe_aggregation(success, duration_secs);
}

/// Record the result of a reclaim sweep.
pub fn record_sweep(requeued: usize, dead_lettered: usize, adopted: usize) {
    if requeued + dead_lettered > 0 {
        tracing::warn!(requeued, dead_lettered, adopted, "reclaimed expired leases");
    } else {
        tracing::debug!(adopted, "sweep found no expired leases");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_reclaimed(requeued, dead_lettered);
}

/// Update queue depth gauges.
pub fn set_queue_depth(queued: usize, processing: usize, dead: usize) {
    tracing::debug!(queued, processing, dead, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(queued, processing, dead);
}

/// Observe how long a render took.
pub fn observe_render_duration(key: TaskKey, success: bool, duration_secs: f64) {
    tracing::debug!(
        job_id = %key.job_id,
        task_id = key.task_id,
        success,
        duration_secs,
        "render duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_render_duration(success, duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let span = dispatch_span("alice", "k8s");
            assert_eq!(span.metadata().unwrap().name(), "reel.dispatch");
            let span = lease_span("w0");
            assert_eq!(span.metadata().unwrap().name(), "reel.lease");
            let span = render_span(TaskKey::new(JobId(1), 2), "w0");
            assert_eq!(span.metadata().unwrap().name(), "reel.render");
            let span = aggregate_span(JobId(1));
            assert_eq!(span.metadata().unwrap().name(), "reel.aggregate");
        });
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        let key = TaskKey::new(JobId(1), 2);
        record_job_started(JobId(1), 15);
        record_task_outcome(key, "resolved");
        record_aggregation(JobId(1), true, 0.5);
        record_sweep(1, 0, 2);
        set_queue_depth(3, 1, 0);
        observe_render_duration(key, false, 0.1);
    }
}
