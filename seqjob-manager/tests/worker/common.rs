//! Common test utilities for worker tests

use reqwest::StatusCode;
use seqjob_manager::error::NotifyError;
use seqjob_manager::magus::{Preset, WorkflowState};
use seqjob_manager::notify::Notifier;
use seqjob_manager::runner::{ExitKind, Invocation, StepOutcome, ToolRunner};
use seqjob_manager::submit::submit_magus;
use seqjob_manager::{JobStore, Worker, WorkerConfig};
use seqjob_manager_sdk::{async_trait, Notification};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const MAGUS_BIN: &str = "/opt/magus/bin/magus";
pub const XTREE_BIN: &str = "/opt/xtree/bin/xtree";

/// Runner that records invocations and fails the steps it is told to
#[derive(Default)]
pub struct ScriptedRunner {
    failures: HashMap<String, ExitKind>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn failing(step_id: &str, status: ExitKind) -> Self {
        let mut failures = HashMap::new();
        failures.insert(step_id.to_string(), status);
        Self {
            failures,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|inv| inv.step_id).collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation, _timeout: Duration) -> StepOutcome {
        self.calls.lock().unwrap().push(invocation.clone());
        let status = self
            .failures
            .get(&invocation.step_id)
            .cloned()
            .unwrap_or(ExitKind::Success);
        StepOutcome {
            stdout: format!("ran {}\n", invocation.step_id),
            stderr: String::new(),
            status,
        }
    }
}

/// Notifier that keeps every notification, optionally failing delivery
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn unreachable() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Status(StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}

/// Temporary store plus worker wiring
pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<JobStore>,
    pub config: WorkerConfig,
    pub runner: Arc<ScriptedRunner>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ScriptedRunner::default(), RecordingNotifier::default())
    }

    pub fn with(runner: ScriptedRunner, notifier: RecordingNotifier) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = WorkerConfig::new()
            .with_data_dir(tmp.path().join("data"))
            .with_poll_interval(Duration::from_millis(10))
            .with_binaries(MAGUS_BIN, XTREE_BIN);
        let store = Arc::new(JobStore::open(&config.data_dir).unwrap());

        Self {
            tmp,
            store,
            config,
            runner: Arc::new(runner),
            notifier: Arc::new(notifier),
        }
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.store.clone(),
            self.config.clone(),
            self.runner.clone(),
            self.notifier.clone(),
        )
    }

    /// Write a small FASTQ upload into the temp dir
    pub fn upload(&self, name: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, "@read1\nACGT\n+\nIIII\n").unwrap();
        path
    }

    pub fn submit_preset(&self, preset: Preset) -> Uuid {
        self.submit_workflow(&WorkflowState::from_preset(preset))
    }

    pub fn submit_workflow(&self, workflow: &WorkflowState) -> Uuid {
        let upload = self.upload("reads.fq");
        submit_magus(&self.store, "user@example.org", workflow, &upload)
            .unwrap()
            .job_id
    }
}
