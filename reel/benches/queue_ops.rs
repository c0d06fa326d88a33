//! Benchmarks for queue and fan-out operations using criterion.
//!
//! These benchmarks measure:
//! - Single task enqueue
//! - Full task lifecycle (enqueue → lease → resolve)
//! - Job fan-out across frame counts
//! - Draining a job through the worker path

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use reel::{JobId, MemoryStore, Product, TaskKey, TaskQueue, start_job};
use reel_testkit::{TestHarness, drain};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn bench_enqueue_single(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("enqueue_single");
    group.sample_size(100);

    group.bench_function("in_memory", |b| {
        let store = Arc::new(MemoryStore::default());
        let mut task_id = 0u64;

        b.to_async(&rt).iter(|| {
            task_id += 1;
            let store = store.clone();
            let key = TaskKey::new(JobId(1), task_id);
            async move {
                store
                    .enqueue(key, b"{}".to_vec())
                    .await
                    .expect("enqueue should succeed");
            }
        });
    });

    group.finish();
}

/// Benchmark: enqueue, lease and resolve one task.
fn bench_task_lifecycle(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("task_lifecycle");
    group.sample_size(100);

    group.bench_function("in_memory", |b| {
        let store = Arc::new(MemoryStore::default());
        let mut task_id = 0u64;

        b.to_async(&rt).iter(|| {
            task_id += 1;
            let store = store.clone();
            let key = TaskKey::new(JobId(1), task_id);
            async move {
                store.enqueue(key, b"{}".to_vec()).await.expect("enqueue");
                let lease = store
                    .lease_next("bench", Duration::from_millis(10))
                    .await
                    .expect("lease")
                    .expect("entry available");
                assert!(store.resolve(lease.key).await.expect("resolve"));
            }
        });
    });

    group.finish();
}

/// Benchmark: dispatching a job of N frames.
fn bench_fan_out(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("fan_out");
    group.sample_size(50);

    for frames in [1u32, 15, 60, 240] {
        group.throughput(Throughput::Elements(u64::from(frames)));
        group.bench_with_input(BenchmarkId::new("in_memory", frames), &frames, |b, &frames| {
            let harness = TestHarness::new(frames);

            b.to_async(&rt).iter(|| {
                let ctx = harness.ctx.clone();
                async move {
                    start_job(&ctx, "bench", Product::Kubernetes)
                        .await
                        .expect("start_job should succeed");
                }
            });
        });
    }

    group.finish();
}

/// Benchmark: dispatching and draining a whole job with mock rendering.
fn bench_job_drain(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("job_drain");
    group.sample_size(20);

    for frames in [15u32, 60] {
        group.throughput(Throughput::Elements(u64::from(frames)));
        group.bench_with_input(BenchmarkId::new("in_memory", frames), &frames, |b, &frames| {
            let harness = TestHarness::new(frames);

            b.to_async(&rt).iter(|| {
                let ctx = harness.ctx.clone();
                async move {
                    start_job(&ctx, "bench", Product::Gopher)
                        .await
                        .expect("start_job should succeed");
                    drain(&ctx, "bench").await;
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_enqueue_single,
    bench_task_lifecycle,
    bench_fan_out,
    bench_job_drain
);
criterion_main!(benches);
