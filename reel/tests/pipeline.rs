//! End-to-end tests of dispatch, work, aggregation and status over the
//! in-memory store.
//!
//! Covers the single-job walkthrough, scene staging, deterministic frame
//! ordering, render failures, undecodable payloads and aggregation failures.

use std::time::Duration;

use reel::{
    JobId, JobStatus, Product, ReelError, RenderEventPayload, ResurrectionOutcome,
    TaskKey, TaskOutcome, TaskQueue, get_job, get_job_str, job_progress, start_job,
};
use reel_testkit::{StageRecord, TestHarness, drain};
use tokio::time::timeout;

#[tokio::test]
async fn test_single_job_walkthrough() {
    let harness = TestHarness::new(15);
    let ctx = &harness.ctx;

    let job_id = start_job(ctx, "alice", Product::Kubernetes).await.unwrap();
    assert_eq!(job_id, JobId(1));

    let view = get_job(ctx, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.final_url, "");

    let progress = job_progress(ctx, job_id).await.unwrap();
    assert_eq!(progress.queued, 15);
    assert_eq!(progress.completed, 0);

    // Entries are leased in enqueue order: 1_1 .. 1_15.
    let mut leased = Vec::new();
    while let Some(lease) = harness
        .store
        .lease_next("w", Duration::from_millis(10))
        .await
        .unwrap()
    {
        leased.push(lease);
    }
    let keys: Vec<String> = leased.iter().map(|l| l.key.to_string()).collect();
    let expected: Vec<String> = (1..=15).map(|t| format!("1_{t}")).collect();
    assert_eq!(keys, expected);

    let mut outcomes = Vec::new();
    for lease in leased {
        outcomes.push(reel::process_lease(ctx, lease).await.unwrap());
    }
    assert_eq!(
        outcomes.last(),
        Some(&TaskOutcome::Aggregated {
            final_path: "bucket/out.1/animated.gif".to_string()
        })
    );

    let view = get_job(ctx, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert_eq!(view.final_url, "bucket/out.1/animated.gif");

    let final_obj = reel::final_artifact(ctx, job_id);
    assert!(harness.artifacts.is_public(&final_obj));
    harness.compiler.assert_compile_count_eq(1);
    harness.renderer.assert_render_count_eq(15);
}

#[tokio::test]
async fn test_render_requests_carry_scene_inputs() {
    let harness = TestHarness::new(2);
    start_job(&harness.ctx, "bob", Product::Grpc).await.unwrap();
    drain(&harness.ctx, "w").await;

    let calls = harness.renderer.calls();
    assert_eq!(calls.len(), 2);
    let first = &calls[0];
    assert_eq!(first.frame, 0);
    assert_eq!(first.caption, "bob");
    assert_eq!(first.rotation_degrees, 20);
    assert_eq!(first.scene.name, "job_1.obj");
    assert_eq!(first.output.name, "out.1/frame_00000.png");
    let assets: Vec<&str> = first.assets.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(assets, ["job_1.mtl", "job_1_badge.png", "k8s.png", "grpc.png"]);
    assert_eq!(calls[1].rotation_degrees, 22);
}

#[tokio::test]
async fn test_scene_is_staged_before_rendering() {
    let harness = TestHarness::new(2);
    let job_id = start_job(&harness.ctx, "bob", Product::Grpc).await.unwrap();

    assert_eq!(
        harness.stager.record(),
        vec![StageRecord {
            job_id,
            caption: "bob".to_string(),
            product: Product::Grpc,
        }]
    );

    drain(&harness.ctx, "w").await;
    let first = &harness.renderer.calls()[0];
    assert!(harness.artifacts.contains(&first.scene));
    for staged in &first.assets[..2] {
        assert!(harness.artifacts.contains(staged), "{staged} was not staged");
    }
    assert_eq!(
        harness.artifacts.content_type(&first.assets[1]).as_deref(),
        Some("image/png")
    );
}

#[tokio::test]
async fn test_staging_failure_enqueues_nothing() {
    let harness = TestHarness::new(3);
    harness.stager.set_fail(true);

    let err = start_job(&harness.ctx, "heidi", Product::Kubernetes)
        .await
        .unwrap_err();
    assert!(matches!(err, ReelError::Stage { job_id: JobId(1), .. }));

    assert_eq!(harness.store.snapshot().await.unwrap().total(), 0);
    let progress = job_progress(&harness.ctx, JobId(1)).await.unwrap();
    assert_eq!(progress.queued, 0);
    harness.renderer.assert_render_count_eq(0);
}

#[tokio::test]
async fn test_frames_are_compiled_in_frame_order() {
    // The harness store shuffles every listing.
    let harness = TestHarness::new(15);
    let job_id = start_job(&harness.ctx, "carol", Product::Gopher).await.unwrap();
    drain(&harness.ctx, "w").await;

    let records = harness.compiler.record();
    assert_eq!(records.len(), 1);
    let names: Vec<&str> = records[0].frames.iter().map(|f| f.name.as_str()).collect();
    let expected: Vec<String> = (0..15)
        .map(|f| format!("out.{job_id}/frame_{f:05}.png"))
        .collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_gif_artifact_is_written() {
    let harness = TestHarness::with_gif(3);
    let job_id = start_job(&harness.ctx, "dave", Product::Kubernetes).await.unwrap();
    drain(&harness.ctx, "w").await;

    let final_obj = reel::final_artifact(&harness.ctx, job_id);
    assert_eq!(harness.artifacts.content_type(&final_obj).as_deref(), Some("image/gif"));
    let bytes = reel::ArtifactStore::get(harness.artifacts.as_ref(), &final_obj)
        .await
        .unwrap();
    assert_eq!(&bytes[..6], b"GIF89a");
}

#[tokio::test]
async fn test_transient_render_failure_is_retried() {
    let harness = TestHarness::new(2);
    harness.renderer.fail_next(1);
    let job_id = start_job(&harness.ctx, "erin", Product::Gopher).await.unwrap();

    let outcomes = drain(&harness.ctx, "w").await;
    assert_eq!(
        outcomes[0],
        TaskOutcome::RenderFailed {
            outcome: Some(ResurrectionOutcome::Requeued { attempts: 1 })
        }
    );

    let view = get_job(&harness.ctx, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Done);
    harness.renderer.assert_render_count_eq(3);
    assert_eq!(
        harness.store.last_error(TaskKey::new(job_id, 1)),
        None,
        "resolved tasks leave no error behind"
    );
}

#[tokio::test]
async fn test_permanent_render_failure_dead_letters_and_job_stays_pending() {
    let harness = TestHarness::new(2);
    harness.renderer.fail_frame(0);
    let job_id = start_job(&harness.ctx, "frank", Product::Grpc).await.unwrap();

    let outcomes = drain(&harness.ctx, "w").await;
    let failures: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            TaskOutcome::RenderFailed { outcome } => *outcome,
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![
            ResurrectionOutcome::Requeued { attempts: 1 },
            ResurrectionOutcome::Requeued { attempts: 2 },
            ResurrectionOutcome::DeadLettered { attempts: 3 },
        ]
    );

    assert_eq!(harness.store.dead_letters(), vec![TaskKey::new(job_id, 1)]);
    let progress = job_progress(&harness.ctx, job_id).await.unwrap();
    assert_eq!(progress.completed, 1);
    assert!(!progress.is_complete());
    assert_eq!(
        get_job(&harness.ctx, job_id).await.unwrap().status,
        JobStatus::Pending
    );
    harness.compiler.assert_compile_count_eq(0);
}

#[tokio::test]
async fn test_undecodable_payload_is_dead_lettered() {
    let harness = TestHarness::new(1);
    let key = TaskKey::new(JobId(42), 1);
    harness
        .store
        .enqueue(key, b"{not json".to_vec())
        .await
        .unwrap();

    let outcomes = drain(&harness.ctx, "w").await;
    assert_eq!(outcomes, vec![TaskOutcome::DeadLettered]);
    assert_eq!(harness.store.dead_letters(), vec![key]);
    assert!(harness.store.last_error(key).is_some());
    harness.renderer.assert_render_count_eq(0);
}

#[tokio::test]
async fn test_aggregation_failure_leaves_job_pending() {
    let harness = TestHarness::new(2);
    harness.compiler.set_fail(true);
    let job_id = start_job(&harness.ctx, "grace", Product::Kubernetes).await.unwrap();

    let outcomes = drain(&harness.ctx, "w").await;
    assert!(matches!(
        outcomes.last(),
        Some(TaskOutcome::AggregationFailed { .. })
    ));

    let view = get_job(&harness.ctx, job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.final_url, "");
}

#[tokio::test]
async fn test_status_of_unknown_job_is_not_found() {
    let harness = TestHarness::new(1);

    let err = get_job(&harness.ctx, JobId(999)).await.unwrap_err();
    assert!(matches!(err, ReelError::NotFound(_)));

    let err = get_job_str(&harness.ctx, "not-a-number").await.unwrap_err();
    assert!(matches!(err, ReelError::NotFound(_)));

    let job_id = start_job(&harness.ctx, "heidi", Product::Gopher).await.unwrap();
    let view = get_job_str(&harness.ctx, &job_id.to_string()).await.unwrap();
    assert_eq!(view.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let harness = TestHarness::new(2);
    let mut rx = harness.ctx.events().subscribe();

    let job_id = start_job(&harness.ctx, "ivan", Product::Grpc).await.unwrap();
    drain(&harness.ctx, "w").await;

    let mut kinds = Vec::new();
    loop {
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Ok(event)) => {
                assert_eq!(event.payload.job_id(), Some(job_id));
                kinds.push(event.payload.kind());
                if matches!(event.payload, RenderEventPayload::JobAggregated { .. }) {
                    break;
                }
            }
            _ => break,
        }
    }

    assert_eq!(
        kinds,
        vec![
            "task_enqueued",
            "task_enqueued",
            "job_created",
            "task_resolved",
            "task_resolved",
            "job_aggregated",
        ]
    );
}
