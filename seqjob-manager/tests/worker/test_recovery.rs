//! Startup recovery and retention sweeps

use super::common::*;
use chrono::{Duration as ChronoDuration, Utc};
use seqjob_manager::lock::{ExecutionLock, LockToken};
use seqjob_manager::magus::Preset;
use seqjob_manager::worker::STALE_JOB_MESSAGE;
use seqjob_manager::Tick;
use seqjob_manager_sdk::{JobStatus, Outcome};
use std::time::Duration;
use uuid::Uuid;

fn write_token(harness: &Harness, pid: u32, age: ChronoDuration) {
    let token = LockToken {
        pid,
        acquired_at: Utc::now() - age,
    };
    std::fs::write(
        harness.config.lock_path(),
        serde_json::to_string(&token).unwrap(),
    )
    .unwrap();
}

/// Pid of a process that has already exited
#[cfg(unix)]
fn exited_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// Claim the job and mark it running as if a worker started it `ago`
fn mark_running(harness: &Harness, id: Uuid, ago: ChronoDuration) {
    assert_eq!(harness.store.dequeue().unwrap(), Some(id));
    harness
        .store
        .set_status(
            id,
            JobStatus::Running {
                started_at: Utc::now() - ago,
            },
        )
        .unwrap();
}

#[test]
fn test_orphaned_running_job_is_marked_failed() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);
    // claimed by a worker that died five hours ago
    assert_eq!(harness.store.dequeue().unwrap(), Some(id));
    let started_at = Utc::now() - ChronoDuration::hours(5);
    harness
        .store
        .set_status(id, JobStatus::Running { started_at })
        .unwrap();

    let report = harness.worker().recover().unwrap();

    assert_eq!(report.failed_jobs, vec![id]);
    match harness.store.load_status(id).unwrap() {
        JobStatus::Error {
            started_at: recorded,
            error,
            ..
        } => {
            assert_eq!(recorded, Some(started_at));
            assert_eq!(error, STALE_JOB_MESSAGE);
        }
        other => panic!("expected error status, got {:?}", other),
    }
    assert!(harness.store.queued_ids().unwrap().is_empty());
}

#[test]
fn test_recent_running_job_of_live_holder_is_left_alone() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);
    mark_running(&harness, id, ChronoDuration::minutes(5));

    // a live worker (this process) still owns the lock
    let lock = ExecutionLock::new(harness.config.lock_path());
    let guard = lock.acquire().unwrap();

    let report = harness.worker().recover().unwrap();

    assert!(!report.lock_cleared);
    assert!(report.failed_jobs.is_empty());
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Running { .. }
    ));
    assert!(lock.is_held());
    guard.release().unwrap();
}

#[test]
fn test_running_job_without_lock_holder_is_failed_at_any_age() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);
    mark_running(&harness, id, ChronoDuration::minutes(5));

    let report = harness.worker().recover().unwrap();

    assert_eq!(report.failed_jobs, vec![id]);
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Error { .. }
    ));
    assert!(!ExecutionLock::new(harness.config.lock_path()).is_held());
}

#[cfg(unix)]
#[tokio::test]
async fn test_crashed_worker_lock_is_recovered_at_startup() {
    let harness = Harness::new();
    let orphan = harness.submit_preset(Preset::EukaryoteDominant);
    mark_running(&harness, orphan, ChronoDuration::minutes(5));
    let waiting = harness.submit_preset(Preset::Balanced);

    // the previous worker died minutes ago, well inside the staleness window
    write_token(&harness, exited_pid(), ChronoDuration::minutes(5));

    let worker = harness.worker();
    let report = worker.recover().unwrap();
    assert!(report.lock_cleared);
    assert_eq!(report.failed_jobs, vec![orphan]);

    let Tick::Processed(processed) = worker.run_once().await.unwrap() else {
        panic!("queue should not be blocked by the dead worker's lock");
    };
    assert_eq!(processed.job_id, waiting);
    assert_eq!(processed.outcome, Outcome::Success);
}

#[cfg(unix)]
#[tokio::test]
async fn test_lock_abandoned_while_running_is_taken_over() {
    let harness = Harness::new();
    let worker = harness.worker();
    assert!(worker.recover().unwrap().failed_jobs.is_empty());

    // another worker claims a job and dies after startup recovery ran
    let orphan = harness.submit_preset(Preset::EukaryoteDominant);
    mark_running(&harness, orphan, ChronoDuration::minutes(1));
    write_token(&harness, exited_pid(), ChronoDuration::minutes(1));
    let waiting = harness.submit_preset(Preset::Balanced);

    let Tick::Processed(processed) = worker.run_once().await.unwrap() else {
        panic!("expected the abandoned lock to be taken over");
    };
    assert_eq!(processed.job_id, waiting);

    match harness.store.load_status(orphan).unwrap() {
        JobStatus::Error { error, .. } => assert_eq!(error, STALE_JOB_MESSAGE),
        other => panic!("expected error status, got {:?}", other),
    }
    assert!(!ExecutionLock::new(harness.config.lock_path()).is_held());
}

#[tokio::test]
async fn test_old_lock_of_live_holder_still_blocks_polling() {
    let harness = Harness::new();
    harness.submit_preset(Preset::EukaryoteDominant);

    // a live holder running a long multi-step job is never displaced by age
    write_token(&harness, std::process::id(), ChronoDuration::hours(6));

    assert_eq!(harness.worker().run_once().await.unwrap(), Tick::Busy);
    assert_eq!(harness.store.queue_len().unwrap(), 1);
}

#[test]
fn test_stale_lock_is_cleared_fresh_lock_is_kept() {
    let harness = Harness::new();
    let lock = ExecutionLock::new(harness.config.lock_path());

    write_token(&harness, std::process::id(), ChronoDuration::minutes(5));
    assert!(!harness.worker().recover().unwrap().lock_cleared);
    assert!(lock.is_held());

    write_token(&harness, std::process::id(), ChronoDuration::hours(6));
    assert!(harness.worker().recover().unwrap().lock_cleared);
    assert!(!lock.is_held());
}

#[test]
fn test_unreadable_lock_token_is_cleared() {
    let harness = Harness::new();
    std::fs::write(harness.config.lock_path(), "not json").unwrap();

    assert!(harness.worker().recover().unwrap().lock_cleared);
    assert!(!ExecutionLock::new(harness.config.lock_path()).is_held());
}

#[tokio::test]
async fn test_sweep_purges_expired_jobs_of_any_status() {
    let harness = Harness::new();
    let finished = harness.submit_preset(Preset::EukaryoteDominant);
    harness.worker().run_once().await.unwrap();
    let queued = harness.submit_preset(Preset::Balanced);

    // nothing is older than the default seven day window
    assert_eq!(harness.worker().sweep().unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let config = harness.config.clone().with_retention(Duration::from_millis(1));
    let worker = seqjob_manager::Worker::new(
        harness.store.clone(),
        config,
        harness.runner.clone(),
        harness.notifier.clone(),
    );

    assert_eq!(worker.sweep().unwrap(), 2);
    assert!(!harness.store.job_dir(finished).exists());
    assert!(!harness.store.job_dir(queued).exists());
    assert_eq!(harness.store.queue_len().unwrap(), 0);
}
