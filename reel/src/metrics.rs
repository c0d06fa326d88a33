//! Prometheus metrics for render coordination.
//!
//! # Metrics
//!
//! ## Counters
//! - `reel_jobs_started_total` - Jobs dispatched
//! - `reel_tasks_enqueued_total` - Tasks fanned out
//! - `reel_task_outcomes_total` - Task attempts by outcome
//! - `reel_leases_reclaimed_total` - Entries moved out of `processing` by sweeps
//!
//! ## Gauges
//! - `reel_queue_depth` - Entries per queue list
//!
//! ## Histograms
//! - `reel_render_duration_seconds` - Renderer call duration
//! - `reel_aggregation_duration_seconds` - Aggregation duration
#![cfg(feature = "metrics")]

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    exponential_buckets,
};
use std::sync::LazyLock;

/// Global Prometheus registry for reel metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for dispatched jobs.
pub static JOBS_STARTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("reel_jobs_started_total", "Total number of jobs dispatched")
        .expect("reel_jobs_started_total metric creation failed")
});

/// Counter for enqueued tasks.
pub static TASKS_ENQUEUED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("reel_tasks_enqueued_total", "Total number of tasks enqueued")
        .expect("reel_tasks_enqueued_total metric creation failed")
});

/// Counter for task attempt outcomes.
///
/// Labels:
/// - `outcome`: resolved, requeued, dead_lettered, lost
pub static TASK_OUTCOMES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("reel_task_outcomes_total", "Task attempts by outcome");
    CounterVec::new(opts, &["outcome"])
        .expect("reel_task_outcomes_total metric creation failed")
});

/// Counter for entries reclaimed by sweeps.
///
/// Labels:
/// - `destination`: queued, dead
pub static LEASES_RECLAIMED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "reel_leases_reclaimed_total",
        "Entries moved out of processing by reclaim sweeps",
    );
    CounterVec::new(opts, &["destination"])
        .expect("reel_leases_reclaimed_total metric creation failed")
});

/// Gauge for queue list lengths.
///
/// Labels:
/// - `list`: queued, processing, dead
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("reel_queue_depth", "Entries per queue list");
    GaugeVec::new(opts, &["list"]).expect("reel_queue_depth metric creation failed")
});

/// Histogram for render call duration.
pub static RENDER_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 14).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "reel_render_duration_seconds",
        "Renderer call duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["success"])
        .expect("reel_render_duration_seconds metric creation failed")
});

/// Histogram for aggregation duration.
pub static AGGREGATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 12).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "reel_aggregation_duration_seconds",
        "Aggregation duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["success"])
        .expect("reel_aggregation_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry. Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_STARTED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(TASKS_ENQUEUED_TOTAL.clone()),
        Box::new(TASK_OUTCOMES_TOTAL.clone()),
        Box::new(LEASES_RECLAIMED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(RENDER_DURATION_SECONDS.clone()),
        Box::new(AGGREGATION_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Count a dispatched job and its tasks.
pub fn record_job_started(tasks: u64) {
    JOBS_STARTED_TOTAL.inc();
    TASKS_ENQUEUED_TOTAL.inc_by(tasks);
}

/// Count one processed lease by outcome label.
pub fn record_task_outcome(outcome: &str) {
    TASK_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Count leases reclaimed by a sweep.
pub fn record_reclaimed(requeued: usize, dead_lettered: usize) {
    LEASES_RECLAIMED_TOTAL
        .with_label_values(&["queued"])
        .inc_by(requeued as f64);
    LEASES_RECLAIMED_TOTAL
        .with_label_values(&["dead"])
        .inc_by(dead_lettered as f64);
}

/// Queue depth gauges.
pub fn set_queue_depth(queued: usize, processing: usize, dead: usize) {
    QUEUE_DEPTH.with_label_values(&["queued"]).set(queued as f64);
    QUEUE_DEPTH
        .with_label_values(&["processing"])
        .set(processing as f64);
    QUEUE_DEPTH.with_label_values(&["dead"]).set(dead as f64);
}

/// Render latency histogram.
pub fn observe_render_duration(success: bool, duration_secs: f64) {
    RENDER_DURATION_SECONDS
        .with_label_values(&[if success { "true" } else { "false" }])
        .observe(duration_secs);
}

/// Aggregation latency histogram.
pub fn observe_aggregation(success: bool, duration_secs: f64) {
    AGGREGATION_DURATION_SECONDS
        .with_label_values(&[if success { "true" } else { "false" }])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
