//! Subprocess supervision for a single workflow step
//!
//! A runner executes one argv with a wall-clock budget and always returns a
//! `StepOutcome`. Failures to launch, non-zero exits and timeouts are values
//! here; the worker decides what they mean for the job.

use seqjob_manager_sdk::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for output readers once the process is gone. A killed
/// tool can leave grandchildren that still hold the pipes open.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One subprocess to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub step_id: String,
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    /// Non-zero exit; `None` when killed by a signal
    Failed(Option<i32>),
    LaunchFailed(String),
    TimedOut(Duration),
}

/// Captured output and exit classification of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitKind,
}

impl StepOutcome {
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            status: ExitKind::LaunchFailed(message.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExitKind::Success
    }

    /// Job error message for a failed step, `None` on success
    pub fn failure_message(&self, step_id: &str) -> Option<String> {
        match &self.status {
            ExitKind::Success => None,
            ExitKind::Failed(Some(code)) => {
                Some(format!("step '{}' exited with code {}", step_id, code))
            }
            ExitKind::Failed(None) => {
                Some(format!("step '{}' was terminated by a signal", step_id))
            }
            ExitKind::LaunchFailed(reason) => {
                Some(format!("step '{}' failed to launch: {}", step_id, reason))
            }
            ExitKind::TimedOut(budget) => Some(format!(
                "step '{}' timed out after {}s and was killed",
                step_id,
                budget.as_secs()
            )),
        }
    }
}

/// Executes one invocation under a timeout
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> StepOutcome;
}

/// Runs the real binary as a child process
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> StepOutcome {
        let Some((program, args)) = invocation.argv.split_first() else {
            return StepOutcome::launch_failed("empty command");
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return StepOutcome::launch_failed(format!("{}: {}", program, e)),
        };
        debug!(step = %invocation.step_id, pid = ?child.id(), "step started");

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, stdout_buf.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, stderr_buf.clone()));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(timeout) => None,
        };

        let status = match waited {
            Some(Ok(status)) if status.success() => ExitKind::Success,
            Some(Ok(status)) => ExitKind::Failed(status.code()),
            Some(Err(e)) => ExitKind::LaunchFailed(e.to_string()),
            None => {
                warn!(step = %invocation.step_id, timeout_secs = timeout.as_secs(), "step timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(step = %invocation.step_id, error = %e, "failed to kill step");
                }
                ExitKind::TimedOut(timeout)
            }
        };

        drain(stdout_task).await;
        drain(stderr_task).await;

        StepOutcome {
            stdout: take_buffer(&stdout_buf),
            stderr: take_buffer(&stderr_buf),
            status,
        }
    }
}

fn spawn_line_reader<R>(reader: R, buffer: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // invalid UTF-8 must not end the drain while the child is still writing
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let mut buf = buffer.lock().unwrap_or_else(|p| p.into_inner());
                    buf.push_str(&String::from_utf8_lossy(&line));
                    if !buf.ends_with('\n') {
                        buf.push('\n');
                    }
                }
                Err(e) => {
                    warn!(error = %e, "output reader stopped");
                    break;
                }
            }
        }
    })
}

async fn drain(task: Option<JoinHandle<()>>) {
    if let Some(mut handle) = task {
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut handle)
            .await
            .is_err()
        {
            handle.abort();
        }
    }
}

fn take_buffer(buffer: &Arc<Mutex<String>>) -> String {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|p| p.into_inner()))
}

/// Simulated execution: waits, then echoes the argv instead of launching
#[derive(Debug, Clone)]
pub struct StubRunner {
    delay: Duration,
}

impl StubRunner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ToolRunner for StubRunner {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> StepOutcome {
        if self.delay > timeout {
            tokio::time::sleep(timeout).await;
            return StepOutcome {
                stdout: String::new(),
                stderr: String::new(),
                status: ExitKind::TimedOut(timeout),
            };
        }

        tokio::time::sleep(self.delay).await;
        StepOutcome {
            stdout: format!(
                "stub execution\nstep: {}\ncommand: {}\n",
                invocation.step_id,
                invocation.display()
            ),
            stderr: String::new(),
            status: ExitKind::Success,
        }
    }
}
