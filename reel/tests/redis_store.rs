//! Tests against a live Redis server.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379/15 cargo test --features redis -- --ignored`.
//! Every test namespaces its keys under a fresh prefix.
#![cfg(feature = "redis")]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel::{
    JobId, JobStatus, JobStore, LeaseExpiryScanner, LeaseRetryConfig, Product,
    RedisStore, ResurrectionOutcome, ServiceContextBuilder, TaskKey, TaskQueue,
    get_job, start_job,
};
use reel_testkit::{
    InMemoryArtifactStore, MockRenderer, RecordingCompiler, RecordingStager, drain,
};
use uuid::Uuid;

async fn connect() -> RedisStore {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    let prefix = format!("reel-test-{}", Uuid::new_v4());
    RedisStore::connect(&url, prefix, LeaseRetryConfig::default())
        .await
        .expect("redis must be reachable for ignored tests")
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_job_counters() {
    let store = connect().await;

    let first = store.create_job().await.unwrap();
    let second = store.create_job().await.unwrap();
    assert!(second > first);

    let record = store.get_job(first).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.final_path, "");

    assert_eq!(store.increment_queued(first).await.unwrap(), 1);
    assert_eq!(store.increment_queued(first).await.unwrap(), 2);
    assert_eq!(store.increment_completed(first).await.unwrap(), 1);
    assert_eq!(store.queued_count(first).await.unwrap(), 2);
    assert_eq!(store.completed_count(second).await.unwrap(), 0);

    store.mark_done(first, "bucket/out.1/animated.gif").await.unwrap();
    let record = store.get_job(first).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Done);

    assert!(store.get_job(JobId(u64::MAX)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_lease_resolve_and_fail() {
    let store = connect().await;
    let a = TaskKey::new(JobId(1), 1);
    let b = TaskKey::new(JobId(1), 2);
    store.enqueue(a, b"a".to_vec()).await.unwrap();
    store.enqueue(b, b"b".to_vec()).await.unwrap();

    let lease = store
        .lease_next("w", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.key, a);
    assert_eq!(lease.payload, b"a");

    let outcome = store.fail(a, Some("boom".into())).await.unwrap();
    assert_eq!(outcome, Some(ResurrectionOutcome::Requeued { attempts: 1 }));

    // Requeued entries go to the head.
    let lease = store
        .lease_next("w", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.key, a);
    assert_eq!(lease.attempts, 1);

    assert!(store.resolve(a).await.unwrap());
    assert!(!store.resolve(a).await.unwrap());

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.queued, 1);
    assert!(snapshot.processing.is_empty());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_resolve_and_count_records_pending_fan_in() {
    let store = connect().await;
    let job = store.create_job().await.unwrap();
    for _ in 0..2 {
        let task_id = store.increment_queued(job).await.unwrap();
        store.enqueue(TaskKey::new(job, task_id), b"x".to_vec()).await.unwrap();
    }

    let first = store.lease_next("w", Duration::ZERO).await.unwrap().unwrap();
    let count = store.resolve_and_count(first.key).await.unwrap().unwrap();
    assert_eq!((count.completed, count.queued), (1, 2));
    assert!(!count.is_last());

    let second = store.lease_next("w", Duration::ZERO).await.unwrap().unwrap();
    assert!(store.resolve_and_count(second.key).await.unwrap().unwrap().is_last());
    assert_eq!(store.resolve_and_count(second.key).await.unwrap(), None);
    assert_eq!(store.completed_count(job).await.unwrap(), 2);

    // The fan-in marker survives until the job is marked done.
    let later = Utc::now() + chrono::Duration::seconds(600);
    let stale_before = later - chrono::Duration::seconds(300);
    assert_eq!(store.claim_stale_fan_ins(stale_before, later).await.unwrap(), vec![job]);
    assert!(store.claim_stale_fan_ins(stale_before, later).await.unwrap().is_empty());

    store.mark_done(job, "bucket/out.1/animated.gif").await.unwrap();
    let much_later = later + chrono::Duration::seconds(600);
    assert!(store
        .claim_stale_fan_ins(much_later, much_later)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_blocking_lease_times_out_and_wakes() {
    let store = Arc::new(connect().await);

    let empty = store
        .lease_next("w", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(empty.is_none());

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.lease_next("w", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let key = TaskKey::new(JobId(7), 1);
    store.enqueue(key, b"x".to_vec()).await.unwrap();

    let lease = waiter.await.unwrap().unwrap().unwrap();
    assert_eq!(lease.key, key);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_sweep_requeues_expired_leases() {
    let store = connect().await;
    let key = TaskKey::new(JobId(3), 1);
    store.enqueue(key, b"x".to_vec()).await.unwrap();
    store
        .lease_next("w", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let report = store.scan_expired_leases(Utc::now()).await.unwrap();
    assert_eq!(report.reclaimed(), 0);

    let later = Utc::now() + chrono::Duration::seconds(600);
    let report = store.scan_expired_leases(later).await.unwrap();
    assert_eq!(report.requeued, vec![key]);
    assert!(!store.resolve(key).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis server"]
async fn test_concurrent_leases_are_exclusive() {
    let store = Arc::new(connect().await);
    for task in 1..=50 {
        store
            .enqueue(TaskKey::new(JobId(9), task), b"x".to_vec())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("w{w}");
            let mut keys = Vec::new();
            while let Some(lease) = store
                .lease_next(&worker_id, Duration::from_millis(200))
                .await
                .unwrap()
            {
                keys.push(lease.key);
            }
            keys
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for key in handle.await.unwrap() {
            assert!(seen.insert(key), "entry {key} leased twice");
        }
    }
    assert_eq!(seen.len(), 50);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_end_to_end_over_redis() {
    let store = Arc::new(connect().await);
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let ctx = ServiceContextBuilder::new()
        .with_store(store)
        .with_renderer(Arc::new(MockRenderer::new(artifacts.clone())))
        .with_compiler(Arc::new(RecordingCompiler::new(artifacts.clone())))
        .with_artifacts(artifacts.clone())
        .with_stager(Arc::new(RecordingStager::new(artifacts)))
        .with_render_config(reel::RenderConfig {
            frames_per_job: 4,
            bucket: "bucket".to_string(),
            ..reel::RenderConfig::default()
        })
        .build()
        .unwrap();

    let job_id = start_job(&ctx, "alice", Product::Kubernetes).await.unwrap();
    drain(&ctx, "w").await;

    let view = get_job(&ctx, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert_eq!(view.final_url, format!("bucket/out.{job_id}/animated.gif"));
}
