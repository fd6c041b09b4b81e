//! Step execution: ordering, failure handling and plan rejection

use super::common::*;
use seqjob_manager::magus::{Preset, WorkflowState};
use seqjob_manager::runner::ExitKind;
use seqjob_manager::store::NewJob;
use seqjob_manager::submit::submit_xtree;
use seqjob_manager::xtree::{BuildOptions, GlobalOptions, XTreeMode, XTreeParams};
use seqjob_manager::Tick;
use seqjob_manager_sdk::{JobStatus, Outcome, Tool};
use std::time::Duration;

const EUKARYOTE_STEPS: [&str; 5] = ["qc", "single-assembly", "binning", "taxonomy", "find-euks"];

#[tokio::test]
async fn test_successful_job_runs_every_step_in_order() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    let report = match harness.worker().run_once().await.unwrap() {
        Tick::Processed(report) => report,
        other => panic!("expected a processed job, got {:?}", other),
    };

    assert_eq!(report.job_id, id);
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.steps_run, 5);
    assert_eq!(harness.runner.step_ids(), EUKARYOTE_STEPS);
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Done { .. }
    ));

    let transcript = harness.store.read_transcript(id).unwrap().unwrap();
    let positions: Vec<usize> = EUKARYOTE_STEPS
        .iter()
        .map(|step| transcript.find(&format!("=== [{}]", step)).unwrap())
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(transcript.contains("ran find-euks"));
}

#[tokio::test]
async fn test_magus_invocations_use_configured_binary_and_input() {
    let harness = Harness::new();
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    harness.worker().run_once().await.unwrap();

    let calls = harness.runner.calls();
    let input = harness.store.input_path(id).unwrap();
    for call in &calls {
        assert_eq!(call.argv[0], MAGUS_BIN);
        assert_eq!(call.argv[1], call.step_id);
        let tail = &call.argv[call.argv.len() - 2..];
        assert_eq!(tail, ["--input".to_string(), input.display().to_string()]);
        assert_eq!(call.working_dir.as_deref(), Some(harness.store.output_dir(id).as_path()));
    }

    let command = std::fs::read_to_string(harness.store.job_dir(id).join("command.txt")).unwrap();
    assert_eq!(command.lines().count(), calls.len());
    assert!(command.lines().all(|line| line.starts_with(MAGUS_BIN)));
}

#[tokio::test]
async fn test_failing_step_stops_remaining_steps() {
    let harness = Harness::with(
        ScriptedRunner::failing("single-assembly", ExitKind::Failed(Some(1))),
        RecordingNotifier::default(),
    );
    let id = harness.submit_preset(Preset::EukaryoteDominant);

    let Tick::Processed(report) = harness.worker().run_once().await.unwrap() else {
        panic!("expected a processed job");
    };

    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(report.steps_run, 2);
    assert_eq!(harness.runner.step_ids(), ["qc", "single-assembly"]);

    match harness.store.load_status(id).unwrap() {
        JobStatus::Error {
            started_at, error, ..
        } => {
            assert!(started_at.is_some());
            assert_eq!(error, "step 'single-assembly' exited with code 1");
        }
        other => panic!("expected error status, got {:?}", other),
    }

    let transcript = harness.store.read_transcript(id).unwrap().unwrap();
    assert!(transcript.contains("=== [qc]"));
    assert!(transcript.contains("=== [single-assembly]"));
    assert!(!transcript.contains("=== [binning]"));
}

#[tokio::test]
async fn test_timed_out_step_fails_job() {
    let harness = Harness::with(
        ScriptedRunner::failing("qc", ExitKind::TimedOut(Duration::from_secs(3600))),
        RecordingNotifier::default(),
    );
    let id = harness.submit_preset(Preset::Balanced);

    harness.worker().run_once().await.unwrap();

    assert_eq!(harness.runner.step_ids(), ["qc"]);
    match harness.store.load_status(id).unwrap() {
        JobStatus::Error { error, .. } => {
            assert_eq!(error, "step 'qc' timed out after 3600s and was killed");
        }
        other => panic!("expected error status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_workflow_is_rejected_without_running() {
    let harness = Harness::new();
    let upload = harness.upload("reads.fq");
    let id = harness
        .store
        .create_job(NewJob {
            tool: Tool::Magus,
            email: "user@example.org".into(),
            mode: None,
            params: serde_json::to_value(WorkflowState::default()).unwrap(),
            input: upload,
            mapping: None,
        })
        .unwrap();
    harness.store.enqueue(id).unwrap();

    let Tick::Processed(report) = harness.worker().run_once().await.unwrap() else {
        panic!("expected a processed job");
    };

    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(report.steps_run, 0);
    assert!(harness.runner.calls().is_empty());

    match harness.store.load_status(id).unwrap() {
        JobStatus::Error {
            started_at, error, ..
        } => {
            assert_eq!(started_at, None);
            assert_eq!(error, "no workflow steps enabled");
        }
        other => panic!("expected error status, got {:?}", other),
    }

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].outcome, Outcome::Failure);
    assert_eq!(sent[0].error.as_deref(), Some("no workflow steps enabled"));
}

#[tokio::test]
async fn test_dependency_violations_are_enforced_at_execution() {
    let harness = Harness::new();
    let upload = harness.upload("reads.fq");

    // stored without going through submission, so enforcement has not run yet
    let mut workflow = WorkflowState::from_preset(Preset::EukaryoteDominant);
    workflow.assembly.enabled = false;
    let id = harness
        .store
        .create_job(NewJob {
            tool: Tool::Magus,
            email: "user@example.org".into(),
            mode: None,
            params: serde_json::to_value(&workflow).unwrap(),
            input: upload,
            mapping: None,
        })
        .unwrap();
    harness.store.enqueue(id).unwrap();

    harness.worker().run_once().await.unwrap();

    // taxonomy and specialized depend on assembly and are dropped
    assert_eq!(harness.runner.step_ids(), ["qc"]);
}

#[tokio::test]
async fn test_xtree_build_job_runs_single_invocation() {
    let harness = Harness::new();
    let upload = harness.upload("refs.fa");
    let mapping = harness.tmp.path().join("taxa.map");
    std::fs::write(&mapping, "ref1\t562\n").unwrap();

    let params = XTreeParams {
        mode: XTreeMode::Build,
        global: GlobalOptions {
            threads: Some(8),
            ..Default::default()
        },
        align: None,
        build: Some(BuildOptions {
            comp: Some(2),
            k: Some(29),
        }),
    };
    let id = submit_xtree(&harness.store, "user@example.org", &params, &upload, Some(&mapping))
        .unwrap()
        .job_id;

    let Tick::Processed(report) = harness.worker().run_once().await.unwrap() else {
        panic!("expected a processed job");
    };
    assert_eq!(report.tool, Tool::Xtree);
    assert_eq!(report.outcome, Outcome::Success);

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 1);
    let argv = &calls[0].argv;
    assert_eq!(calls[0].step_id, "xtree");
    assert_eq!(argv[0], XTREE_BIN);
    assert_eq!(argv[1], "BUILD");

    let map_flag = argv.iter().position(|arg| arg == "--map").unwrap();
    let stored_map = harness.store.mapping_path(id).unwrap().unwrap();
    assert_eq!(argv[map_flag + 1], stored_map.display().to_string());
    assert_eq!(&argv[argv.len() - 2..], ["--db", "xtree.db"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_process_failure_is_captured() {
    use seqjob_manager::runner::ProcessRunner;
    use seqjob_manager::Worker;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    let harness = Harness::new();
    let script = harness.tmp.path().join("fake-magus");
    std::fs::write(
        &script,
        "#!/bin/sh\necho \"running $1\"\nif [ \"$1\" = \"single-assembly\" ]; then\n  echo 'assembler crashed' 1>&2\n  exit 1\nfi\nexit 0\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let id = harness.submit_preset(Preset::EukaryoteDominant);
    let worker = Worker::new(
        harness.store.clone(),
        harness.config.clone().with_binaries(&script, XTREE_BIN),
        Arc::new(ProcessRunner),
        harness.notifier.clone(),
    );

    worker.run_once().await.unwrap();

    let transcript = harness.store.read_transcript(id).unwrap().unwrap();
    assert!(transcript.contains("running qc"));
    assert!(transcript.contains("running single-assembly"));
    assert!(transcript.contains("assembler crashed"));
    assert!(!transcript.contains("running binning"));
    assert!(matches!(
        harness.store.load_status(id).unwrap(),
        JobStatus::Error { .. }
    ));
}
