//! Single-consumer worker loop
//!
//! Each iteration takes the execution lock, claims the head of the queue,
//! prepares the job's plan and runs its steps strictly in order. Every
//! claimed job ends in a persisted terminal status and one notification.
//!
//! ```text
//! Idle --(queue empty)--> sleep
//!   |
//!   +--> Claimed --(plan fails)--> error      (never running)
//!           |
//!           +--> Running --(all steps exit 0)--> done
//!                   |
//!                   +--(exit != 0 | launch failure | timeout)--> error
//! ```

use anyhow::Result;
use chrono::Utc;
use seqjob_manager_sdk::{JobMeta, JobStatus, Notification, Outcome, Tool};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::build_command;
use crate::config::{ExecutionMode, WorkerConfig};
use crate::error::{LockError, PlanError};
use crate::lock::{ExecutionLock, LockGuard};
use crate::magus::{WorkflowState, MAGUS_COMMAND};
use crate::notify::{transcript_tail, LogNotifier, Notifier, WebhookNotifier, TRANSCRIPT_TAIL_LINES};
use crate::runner::{Invocation, ProcessRunner, StubRunner, ToolRunner};
use crate::store::JobStore;
use crate::submit::plan_magus;
use crate::xtree::{build_xtree_command, XTreeParams};

/// Error recorded for a job found `running` at startup
pub const STALE_JOB_MESSAGE: &str = "stale: worker stopped while job was running";

/// What one loop iteration did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Queue was empty
    Idle,
    /// Another holder owns the execution lock
    Busy,
    Processed(JobReport),
    /// Claimed id could not be processed (malformed or not queued)
    Skipped(Uuid),
}

/// Final result of one processed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: Uuid,
    pub tool: Tool,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub steps_run: usize,
}

/// Result of the startup crash-recovery sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub lock_cleared: bool,
    pub failed_jobs: Vec<Uuid>,
}

pub struct Worker {
    store: Arc<JobStore>,
    lock: ExecutionLock,
    runner: Arc<dyn ToolRunner>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    last_sweep: Option<Instant>,
}

impl Worker {
    pub fn new(
        store: Arc<JobStore>,
        config: WorkerConfig,
        runner: Arc<dyn ToolRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            lock: ExecutionLock::new(config.lock_path()),
            runner,
            notifier,
            config,
            last_sweep: None,
        }
    }

    /// Open the store and pick runner and notifier from the configuration
    pub fn from_config(config: WorkerConfig) -> Result<Self> {
        let store = Arc::new(JobStore::open(&config.data_dir)?);

        let runner: Arc<dyn ToolRunner> = match config.mode {
            ExecutionMode::Real => Arc::new(ProcessRunner),
            ExecutionMode::Stub => Arc::new(StubRunner::new(config.stub_delay)),
        };

        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };

        Ok(Self::new(store, config, runner, notifier))
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Clear a stale lock token and fail jobs orphaned in `running`.
    /// Nothing is re-queued.
    ///
    /// When the lock can be taken no other worker is executing, so every
    /// `running` job is orphaned whatever its age. Otherwise only jobs older
    /// than the staleness window are failed.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let lock_cleared = self.lock.clear_stale(self.config.stale_after)?;

        let failed_jobs = match self.lock.acquire() {
            Ok(guard) => {
                let failed = self.fail_orphans(Duration::ZERO)?;
                guard.release()?;
                failed
            }
            Err(LockError::Busy) => self.fail_orphans(self.config.stale_after)?,
            Err(e) => return Err(e.into()),
        };

        Ok(RecoveryReport {
            lock_cleared,
            failed_jobs,
        })
    }

    /// Fail every `running` job started more than `max_age` ago
    fn fail_orphans(&self, max_age: Duration) -> Result<Vec<Uuid>> {
        let mut failed_jobs = Vec::new();
        for id in self.store.find_stale_running(max_age)? {
            let started_at = self.store.load_status(id)?.started_at();
            self.store.set_status(
                id,
                JobStatus::Error {
                    started_at,
                    finished_at: Utc::now(),
                    error: STALE_JOB_MESSAGE.to_string(),
                },
            )?;
            warn!(job_id = %id, "marked orphaned running job as failed");
            failed_jobs.push(id);
        }
        Ok(failed_jobs)
    }

    /// Poll until `shutdown` flips to true. A running job always finishes
    /// before shutdown is observed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            mode = ?self.config.mode,
            data_dir = %self.config.data_dir.display(),
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let tick = match self.run_once().await {
                Ok(tick) => tick,
                Err(e) => {
                    error!(error = %e, "worker iteration failed");
                    Tick::Idle
                }
            };

            self.maybe_sweep();

            if matches!(tick, Tick::Idle | Tick::Busy) {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }

    /// One iteration: claim at most one job and run it to completion
    pub async fn run_once(&self) -> Result<Tick> {
        let guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(LockError::Busy) => match self.take_abandoned_lock()? {
                Some(guard) => guard,
                None => return Ok(Tick::Busy),
            },
            Err(e) => return Err(e.into()),
        };

        let Some(id) = self.store.dequeue()? else {
            return Ok(Tick::Idle);
        };

        let tick = match self.process_claimed(id).await {
            Ok(Some(report)) => Tick::Processed(report),
            Ok(None) => Tick::Skipped(id),
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %id, error = %message, "job could not be processed");
                self.fail_quietly(id, &message);
                match self.report_infrastructure_failure(id, message).await {
                    Some(report) => Tick::Processed(report),
                    None => Tick::Skipped(id),
                }
            }
        };

        guard.release()?;
        Ok(tick)
    }

    /// Take over a lock whose holder died, failing the job it left running
    fn take_abandoned_lock(&self) -> Result<Option<LockGuard>> {
        if !self.lock.clear_abandoned()? {
            return Ok(None);
        }
        let guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(LockError::Busy) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for id in self.fail_orphans(Duration::ZERO)? {
            info!(job_id = %id, "recovered job left running by a dead worker");
        }
        Ok(Some(guard))
    }

    /// Notify the submitter of a job that failed outside step execution.
    /// `None` when the job's metadata is unreadable.
    async fn report_infrastructure_failure(&self, id: Uuid, message: String) -> Option<JobReport> {
        let meta = match self.store.load_meta(id) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(job_id = %id, error = %e, "no metadata, cannot notify");
                return None;
            }
        };
        let report = JobReport {
            job_id: id,
            tool: meta.tool,
            outcome: Outcome::Failure,
            error: Some(message),
            steps_run: 0,
        };
        let transcript = self
            .store
            .read_transcript(id)
            .ok()
            .flatten()
            .unwrap_or_default();
        self.send_notification(&meta, &report, "", &transcript).await;
        Some(report)
    }

    async fn process_claimed(&self, id: Uuid) -> Result<Option<JobReport>> {
        let meta = self.store.load_meta(id)?;
        let status = self.store.load_status(id)?;
        if !matches!(status, JobStatus::Queued { .. }) {
            warn!(job_id = %id, status = status.label(), "dequeued job is not queued, skipping");
            return Ok(None);
        }

        info!(job_id = %id, tool = %meta.tool, "job claimed");

        let invocations = match self.prepare_plan(&meta) {
            Ok(invocations) => invocations,
            Err(e) => {
                let message = e.to_string();
                warn!(job_id = %id, error = %message, "job rejected before execution");
                self.store.set_status(
                    id,
                    JobStatus::Error {
                        started_at: None,
                        finished_at: Utc::now(),
                        error: message.clone(),
                    },
                )?;
                let report = JobReport {
                    job_id: id,
                    tool: meta.tool,
                    outcome: Outcome::Failure,
                    error: Some(message),
                    steps_run: 0,
                };
                self.send_notification(&meta, &report, "", "").await;
                return Ok(Some(report));
            }
        };

        let started_at = Utc::now();
        self.store.set_status(id, JobStatus::Running { started_at })?;

        let command_text = invocations
            .iter()
            .map(Invocation::display)
            .collect::<Vec<_>>()
            .join("\n");
        self.store.write_command(id, &command_text)?;

        let timeout = self.config.timeout_for(meta.tool);
        let mut transcript = String::new();
        let mut failure = None;
        let mut steps_run = 0;

        for invocation in &invocations {
            info!(job_id = %id, step = %invocation.step_id, "step running");
            transcript.push_str(&format!(
                "=== [{}] {} ===\n",
                invocation.step_id,
                invocation.display()
            ));

            let outcome = self.runner.run(invocation, timeout).await;
            steps_run += 1;

            transcript.push_str(&outcome.stdout);
            if !outcome.stderr.is_empty() {
                transcript.push_str("--- stderr ---\n");
                transcript.push_str(&outcome.stderr);
            }

            if let Some(message) = outcome.failure_message(&invocation.step_id) {
                warn!(job_id = %id, step = %invocation.step_id, error = %message, "step failed");
                transcript.push_str(&format!("!!! {}\n", message));
                failure = Some(message);
                break;
            }
        }

        self.store.write_transcript(id, &transcript)?;

        let finished_at = Utc::now();
        let (status, outcome) = match &failure {
            None => (
                JobStatus::Done {
                    started_at,
                    finished_at,
                },
                Outcome::Success,
            ),
            Some(message) => (
                JobStatus::Error {
                    started_at: Some(started_at),
                    finished_at,
                    error: message.clone(),
                },
                Outcome::Failure,
            ),
        };
        self.store.set_status(id, status)?;

        info!(job_id = %id, outcome = ?outcome, steps_run, "job finished");

        let report = JobReport {
            job_id: id,
            tool: meta.tool,
            outcome,
            error: failure,
            steps_run,
        };
        self.send_notification(&meta, &report, &command_text, &transcript)
            .await;
        Ok(Some(report))
    }

    /// Compile and build the job's invocations without running anything
    pub fn prepare_plan(&self, meta: &JobMeta) -> Result<Vec<Invocation>> {
        let params = self.store.load_params(meta.id)?;
        let input = self.store.input_path(meta.id)?;
        let working_dir = Some(self.store.output_dir(meta.id));

        match meta.tool {
            Tool::Magus => {
                let workflow: WorkflowState =
                    serde_json::from_value(params).map_err(|source| PlanError::Params {
                        tool: "magus",
                        source,
                    })?;
                let plan = plan_magus(&workflow)?;

                Ok(plan
                    .steps
                    .iter()
                    .map(|step| Invocation {
                        step_id: step.id.clone(),
                        argv: self.magus_argv(build_command(step), &input),
                        working_dir: working_dir.clone(),
                    })
                    .collect())
            }
            Tool::Xtree => {
                let params: XTreeParams =
                    serde_json::from_value(params).map_err(|source| PlanError::Params {
                        tool: "xtree",
                        source,
                    })?;
                let mapping = self.store.mapping_path(meta.id)?;
                let cmd = build_xtree_command(
                    &self.config.xtree_path,
                    &input,
                    &params,
                    mapping.as_deref(),
                    None,
                );

                Ok(vec![Invocation {
                    step_id: "xtree".to_string(),
                    argv: cmd.argv,
                    working_dir,
                }])
            }
        }
    }

    /// Point the step at the configured binary and the job input
    fn magus_argv(&self, mut argv: Vec<String>, input: &Path) -> Vec<String> {
        if let Some(program) = argv.first_mut() {
            if program == MAGUS_COMMAND {
                *program = self.config.magus_path.display().to_string();
            }
        }
        argv.push("--input".to_string());
        argv.push(input.display().to_string());
        argv
    }

    async fn send_notification(
        &self,
        meta: &JobMeta,
        report: &JobReport,
        command: &str,
        transcript: &str,
    ) {
        let notification = Notification {
            recipient: meta.email.clone(),
            job_id: meta.id,
            tool: meta.tool,
            outcome: report.outcome,
            command: command.to_string(),
            transcript_tail: transcript_tail(transcript, TRANSCRIPT_TAIL_LINES),
            error: report.error.clone(),
        };

        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(job_id = %meta.id, error = %e, "notification failed");
        }
    }

    /// Best effort: record an infrastructure failure on a claimed job
    fn fail_quietly(&self, id: Uuid, message: &str) {
        let started_at = match self.store.load_status(id) {
            Ok(status) if !status.is_terminal() => status.started_at(),
            _ => return,
        };
        let result = self.store.set_status(
            id,
            JobStatus::Error {
                started_at,
                finished_at: Utc::now(),
                error: message.to_string(),
            },
        );
        if let Err(e) = result {
            warn!(job_id = %id, error = %e, "could not record job failure");
        }
    }

    fn maybe_sweep(&mut self) {
        let due = self
            .last_sweep
            .map(|at| at.elapsed() >= self.config.sweep_interval)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_sweep = Some(Instant::now());

        match self.sweep() {
            Ok(0) => {}
            Ok(purged) => info!(purged, "retention sweep removed expired jobs"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
    }

    /// Purge every job older than the retention window. Individual purge
    /// failures are logged and skipped.
    pub fn sweep(&self) -> Result<usize> {
        let mut purged = 0;
        for id in self.store.list_expired(self.config.retention)? {
            match self.store.purge(id) {
                Ok(()) => purged += 1,
                Err(e) => warn!(job_id = %id, error = %e, "failed to purge job"),
            }
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("data_dir", &self.config.data_dir)
            .field("mode", &self.config.mode)
            .finish()
    }
}

