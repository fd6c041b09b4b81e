//! FIFO ordering, the execution lock and the polling loop

use super::common::*;
use seqjob_manager::lock::ExecutionLock;
use seqjob_manager::magus::Preset;
use seqjob_manager::Tick;
use seqjob_manager_sdk::JobStatus;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_empty_queue_is_idle() {
    let harness = Harness::new();
    assert_eq!(harness.worker().run_once().await.unwrap(), Tick::Idle);
    assert!(!ExecutionLock::new(harness.config.lock_path()).is_held());
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let harness = Harness::new();
    let first = harness.submit_preset(Preset::EukaryoteDominant);
    let second = harness.submit_preset(Preset::Balanced);
    let third = harness.submit_preset(Preset::BacteriaFocused);

    let worker = harness.worker();
    let mut order = Vec::new();
    while let Tick::Processed(report) = worker.run_once().await.unwrap() {
        order.push(report.job_id);
    }

    assert_eq!(order, vec![first, second, third]);
    assert_eq!(harness.store.queue_len().unwrap(), 0);
}

#[tokio::test]
async fn test_held_lock_leaves_queue_untouched() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    let lock = ExecutionLock::new(harness.config.lock_path());
    let guard = lock.acquire().unwrap();

    assert_eq!(harness.worker().run_once().await.unwrap(), Tick::Busy);
    assert_eq!(harness.store.queued_ids().unwrap(), vec![id]);
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Queued { .. }
    ));

    guard.release().unwrap();
    assert!(matches!(
        harness.worker().run_once().await.unwrap(),
        Tick::Processed(_)
    ));
}

#[tokio::test]
async fn test_lock_is_released_after_each_job() {
    let harness = Harness::new();
    harness.submit_preset(Preset::EukaryoteDominant);

    harness.worker().run_once().await.unwrap();

    assert!(!ExecutionLock::new(harness.config.lock_path()).is_held());
}

#[tokio::test]
async fn test_already_finished_job_is_skipped() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);
    harness
        .store
        .set_status(
            id,
            JobStatus::Error {
                started_at: None,
                finished_at: chrono::Utc::now(),
                error: "cancelled".into(),
            },
        )
        .unwrap();

    assert_eq!(harness.worker().run_once().await.unwrap(), Tick::Skipped(id));
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn test_run_loop_drains_queue_and_stops_on_shutdown() {
    let harness = Harness::new();
    let first = harness.submit_preset(Preset::EukaryoteDominant);
    let second = harness.submit_preset(Preset::Balanced);

    let mut worker = harness.worker();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while harness.store.queue_len().unwrap() > 0
        || !matches!(harness.store.load_status(second).unwrap(), JobStatus::Done { .. })
    {
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain queue");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert!(matches!(
        harness.store.load_status(first).unwrap(),
        JobStatus::Done { .. }
    ));
    assert_eq!(harness.notifier.sent().len(), 2);
}
