// Re-export the derive macro
pub use seqjob_manager_macros::ArgSchema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// External analysis tool a job targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Magus,
    Xtree,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Magus => "magus",
            Tool::Xtree => "xtree",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "magus" => Ok(Tool::Magus),
            "xtree" => Ok(Tool::Xtree),
            other => Err(format!("unknown tool '{}'", other)),
        }
    }
}

/// Job metadata, written once at submission (meta.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    pub id: Uuid,
    pub tool: Tool,
    pub email: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// File name of the upload under `input/`
    pub input_file: String,
    /// File name of the optional mapping file under `input/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_file: Option<String>,
}

/// Persisted job status record (status.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
    },
    Done {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    pub fn queued() -> Self {
        JobStatus::Queued {
            queued_at: Utc::now(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Queued { .. } => "queued",
            JobStatus::Running { .. } => "running",
            JobStatus::Done { .. } => "done",
            JobStatus::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done { .. } | JobStatus::Error { .. })
    }

    /// Lifecycle is queued -> running -> (done | error). A queued job may
    /// also go straight to error when it is rejected before execution.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued { .. }, JobStatus::Running { .. })
                | (JobStatus::Queued { .. }, JobStatus::Error { .. })
                | (JobStatus::Running { .. }, JobStatus::Done { .. })
                | (JobStatus::Running { .. }, JobStatus::Error { .. })
        )
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Queued { .. } => None,
            JobStatus::Running { started_at } | JobStatus::Done { started_at, .. } => {
                Some(*started_at)
            }
            JobStatus::Error { started_at, .. } => *started_at,
        }
    }
}

/// One concrete external-tool invocation of a compiled workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub stage: String,
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Final outcome reported to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Payload handed to the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub job_id: Uuid,
    pub tool: Tool,
    pub outcome: Outcome,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a schema field renders on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgKind {
    /// `--flag value`, or a bare `--flag` for booleans
    Value,
    /// `--flag <fixed>` emitted when the boolean is set
    FixedValue(String),
}

/// Field schema entry (for help output and JSON export)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgField {
    pub name: String,
    pub flag: Option<String>,
    pub kind: ArgKind,
}

/// Trait for tool parameter structs (auto-implemented by derive macro)
pub trait ArgSchema {
    fn arg_fields() -> Vec<ArgField>;
    fn append_args(&self, argv: &mut Vec<String>);
}

impl<T: ArgSchema> ArgSchema for Option<T> {
    fn arg_fields() -> Vec<ArgField> {
        T::arg_fields()
    }

    fn append_args(&self, argv: &mut Vec<String>) {
        if let Some(inner) = self {
            inner.append_args(argv);
        }
    }
}

/// A single field value that knows how to render itself as a flag
pub trait ArgValue {
    fn push_flag(&self, flag: &str, argv: &mut Vec<String>);
}

impl ArgValue for bool {
    fn push_flag(&self, flag: &str, argv: &mut Vec<String>) {
        if *self {
            argv.push(flag.to_string());
        }
    }
}

impl<T: ArgValue> ArgValue for Option<T> {
    fn push_flag(&self, flag: &str, argv: &mut Vec<String>) {
        if let Some(value) = self {
            value.push_flag(flag, argv);
        }
    }
}

/// Empty strings are treated as unset
impl ArgValue for String {
    fn push_flag(&self, flag: &str, argv: &mut Vec<String>) {
        if !self.is_empty() {
            argv.push(flag.to_string());
            argv.push(self.clone());
        }
    }
}

macro_rules! display_arg_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ArgValue for $ty {
                fn push_flag(&self, flag: &str, argv: &mut Vec<String>) {
                    argv.push(flag.to_string());
                    argv.push(self.to_string());
                }
            }
        )*
    };
}

display_arg_value!(u8, u16, u32, u64, usize, i32, i64, f32, f64);

// ============================================================================
// Console Logging Macros (for the CLI)
// ============================================================================
// Colored console output for human-readable CLI feedback, complementing the
// structured `tracing` events emitted by the worker.
// ============================================================================

/// Logs an informational message.
///
/// # Example
/// ```
/// use seqjob_manager_sdk::log_info;
/// log_info!("Job queued");
/// ```
///
/// Outputs:
/// ```text
/// ℹ Job queued
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
///
/// # Example
/// ```
/// use seqjob_manager_sdk::log_warning;
/// log_warning!("Taxonomy requires assemblies");
/// ```
///
/// Outputs:
/// ```text
/// ⚠ Warning: Taxonomy requires assemblies
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a completed action.
///
/// # Example
/// ```
/// use seqjob_manager_sdk::log_success;
/// log_success!("Purged 3 jobs");
/// ```
#[macro_export]
macro_rules! log_success {
    ($message:expr) => {
        println!("\x1b[32m✓ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[32m✓ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs the number of items found.
///
/// # Example
/// ```
/// use seqjob_manager_sdk::log_found;
/// log_found!(4, "queued jobs");
/// ```
///
/// Outputs:
/// ```text
/// Found 4 queued jobs
/// ```
#[macro_export]
macro_rules! log_found {
    ($count:expr, $item_type:expr) => {
        println!("\x1b[36mFound {} {}\x1b[0m", $count, $item_type);
    };
}
