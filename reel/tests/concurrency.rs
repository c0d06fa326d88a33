//! Concurrency tests: exclusive leasing, exactly-once aggregation under a
//! real worker pool and lease reclaim after a stalled worker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel::{
    JobId, JobStatus, JobStore, LeaseExpiryScanner, Product, TaskKey, TaskOutcome,
    TaskQueue, WorkerConfig, WorkerRuntime, get_job, process_lease, run_sweep,
    start_job,
};
use reel_testkit::{TestHarness, drain};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lessees_never_share_an_entry() {
    let harness = TestHarness::new(1);
    let store = harness.store.clone();

    let total = 200u64;
    for task in 1..=total {
        store
            .enqueue(TaskKey::new(JobId(1), task), b"{}".to_vec())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("lessee-{w}");
            let mut keys = Vec::new();
            while let Some(lease) = store
                .lease_next(&worker_id, Duration::from_millis(20))
                .await
                .unwrap()
            {
                keys.push(lease.key);
            }
            keys
        }));
    }

    let mut seen = HashSet::new();
    let mut count = 0;
    for handle in handles {
        for key in handle.await.unwrap() {
            count += 1;
            assert!(seen.insert(key), "entry {key} leased twice");
        }
    }
    assert_eq!(count, total as usize);

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.queued, 0);
    assert_eq!(snapshot.processing.len(), total as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_aggregates_each_job_exactly_once() {
    let harness = TestHarness::new(15);
    harness.renderer.set_delay(Duration::from_millis(1));

    let runtime = WorkerRuntime::new(
        harness.ctx.clone(),
        WorkerConfig::new("pool").with_parallelism(8),
    );
    runtime.spawn_worker_pool().await;

    let mut jobs = Vec::new();
    for i in 0..5 {
        let caption = format!("user-{i}");
        jobs.push(start_job(&harness.ctx, &caption, Product::Kubernetes).await.unwrap());
    }

    let ctx = harness.ctx.clone();
    let all_done = timeout(Duration::from_secs(20), async {
        loop {
            let mut done = 0;
            for job_id in &jobs {
                if get_job(&ctx, *job_id).await.unwrap().status == JobStatus::Done {
                    done += 1;
                }
            }
            if done == jobs.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(all_done.is_ok(), "jobs did not finish within 20 seconds");

    runtime.shutdown().await.unwrap();

    for job_id in &jobs {
        assert_eq!(harness.compiler.compiles_for(*job_id), 1, "job {job_id}");
        assert_eq!(harness.store.completed_count(*job_id).await.unwrap(), 15);
        let view = get_job(&harness.ctx, *job_id).await.unwrap();
        assert_eq!(view.final_url, format!("bucket/out.{job_id}/animated.gif"));
    }
    harness.renderer.assert_render_count_eq(75);
}

#[tokio::test]
async fn test_stalled_worker_is_not_counted_after_reclaim() {
    let harness = TestHarness::new(2);
    let ctx = &harness.ctx;
    let job_id = start_job(ctx, "judy", Product::Grpc).await.unwrap();

    // A worker leases the first task and stalls.
    let stalled = harness
        .store
        .lease_next("stalled", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stalled.key, TaskKey::new(job_id, 1));

    // Nothing has expired yet.
    let report = harness.store.scan_expired_leases(Utc::now()).await.unwrap();
    assert_eq!(report.reclaimed(), 0);

    let later = Utc::now() + chrono::Duration::seconds(600);
    let report = harness.store.scan_expired_leases(later).await.unwrap();
    assert_eq!(report.requeued, vec![stalled.key]);

    // Another worker completes the whole job, including the reclaimed task.
    drain(ctx, "healthy").await;
    assert_eq!(get_job(ctx, job_id).await.unwrap().status, JobStatus::Done);

    // The stalled worker finishes late; its resolve loses and it is not counted.
    let late = process_lease(ctx, stalled).await.unwrap();
    assert_eq!(late, TaskOutcome::LeaseLost);
    assert_eq!(harness.store.completed_count(job_id).await.unwrap(), 2);
    harness.compiler.assert_compile_count_eq(1);
}

#[tokio::test]
async fn test_sweep_reports_queue_depths() {
    let harness = TestHarness::new(3);
    start_job(&harness.ctx, "ken", Product::Gopher).await.unwrap();
    harness
        .store
        .lease_next("w", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();

    let report = run_sweep(&harness.ctx, Utc::now()).await.unwrap();
    assert_eq!(report.reclaimed(), 0);
    assert_eq!(report.adopted, 0);

    let snapshot = harness.store.snapshot().await.unwrap();
    assert_eq!(snapshot.queued, 2);
    assert_eq!(snapshot.processing, vec![TaskKey::new(JobId(1), 1)]);
    assert_eq!(snapshot.total(), 3);
}

#[tokio::test]
async fn test_runtime_shutdown_with_housekeeper() {
    let harness = TestHarness::new(1);
    let runtime = Arc::new(WorkerRuntime::new(
        harness.ctx.clone(),
        WorkerConfig::new("hk").with_parallelism(2),
    ));
    runtime.spawn_worker_pool().await;
    runtime.spawn_housekeeper().await;

    let job_id = start_job(&harness.ctx, "leo", Product::Grpc).await.unwrap();
    let ctx = harness.ctx.clone();
    timeout(Duration::from_secs(5), async {
        while get_job(&ctx, job_id).await.unwrap().status != JobStatus::Done {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish within 5 seconds");

    timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .expect("shutdown did not complete within 5 seconds")
        .unwrap();
    assert!(runtime.shutdown_token().is_cancelled());
}
