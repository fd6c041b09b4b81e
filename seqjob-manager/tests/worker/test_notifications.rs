//! Notification content, delivery failures and stub execution

use super::common::*;
use seqjob_manager::magus::Preset;
use seqjob_manager::runner::ExitKind;
use seqjob_manager::{ExecutionMode, Tick, Worker};
use seqjob_manager_sdk::{JobStatus, Outcome, Tool};
use std::time::Duration;

#[tokio::test]
async fn test_success_notification_carries_command_and_tail() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    harness.worker().run_once().await.unwrap();

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    let notification = &sent[0];
    assert_eq!(notification.recipient, "user@example.org");
    assert_eq!(notification.job_id, id);
    assert_eq!(notification.tool, Tool::Magus);
    assert_eq!(notification.outcome, Outcome::Success);
    assert_eq!(notification.error, None);
    assert_eq!(notification.command.lines().count(), 5);
    assert!(notification
        .transcript_tail
        .as_deref()
        .unwrap()
        .ends_with("ran find-euks"));
}

#[tokio::test]
async fn test_failure_notification_names_failed_step() {
    let harness = Harness::with(
        ScriptedRunner::failing("binning", ExitKind::Failed(Some(137))),
        RecordingNotifier::default(),
    );
    harness.submit_preset(Preset::EukaryoteDominant);

    harness.worker().run_once().await.unwrap();

    let sent = harness.notifier.sent();
    assert_eq!(sent[0].outcome, Outcome::Failure);
    assert_eq!(
        sent[0].error.as_deref(),
        Some("step 'binning' exited with code 137")
    );
}

#[tokio::test]
async fn test_notification_failure_does_not_change_status() {
    let harness = Harness::with(ScriptedRunner::default(), RecordingNotifier::unreachable());
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    let tick = harness.worker().run_once().await.unwrap();

    assert!(matches!(tick, Tick::Processed(_)));
    assert_eq!(harness.notifier.sent().len(), 1);
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Done { .. }
    ));
}

#[tokio::test]
async fn test_stub_mode_completes_without_binaries() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::BacteriaFocused);

    let config = harness
        .config
        .clone()
        .with_binaries("/nonexistent/magus", "/nonexistent/xtree")
        .with_mode(ExecutionMode::Stub)
        .with_stub_delay(Duration::from_millis(1));
    let worker = Worker::from_config(config).unwrap();

    let Tick::Processed(report) = worker.run_once().await.unwrap() else {
        panic!("expected a processed job");
    };

    assert_eq!(report.outcome, Outcome::Success);
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Done { .. }
    ));
    let transcript = harness.store.read_transcript(id).unwrap().unwrap();
    assert!(transcript.contains("stub execution"));
    assert!(transcript.contains("command: /nonexistent/magus qc"));
}

#[tokio::test]
async fn test_stub_delay_over_budget_times_out() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    let config = harness
        .config
        .clone()
        .with_mode(ExecutionMode::Stub)
        .with_stub_delay(Duration::from_secs(60))
        .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));
    let worker = Worker::from_config(config).unwrap();

    worker.run_once().await.unwrap();

    match harness.store.load_status(id).unwrap() {
        JobStatus::Error { error, .. } => assert!(error.contains("timed out")),
        other => panic!("expected error status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_storage_failure_mid_job_still_notifies() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    // the command file cannot be written over a non-empty directory
    let blocker = harness.store.job_dir(id).join("command.txt");
    std::fs::create_dir_all(blocker.join("occupied")).unwrap();

    let Tick::Processed(report) = harness.worker().run_once().await.unwrap() else {
        panic!("expected the failed job to be reported");
    };
    assert_eq!(report.job_id, id);
    assert_eq!(report.outcome, Outcome::Failure);
    assert!(harness.runner.calls().is_empty());

    let status_error = match harness.store.load_status(id).unwrap() {
        JobStatus::Error {
            started_at, error, ..
        } => {
            assert!(started_at.is_some());
            error
        }
        other => panic!("expected error status, got {:?}", other),
    };

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].job_id, id);
    assert_eq!(sent[0].outcome, Outcome::Failure);
    assert_eq!(sent[0].error.as_deref(), Some(status_error.as_str()));
}
