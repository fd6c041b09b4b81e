//! Error types for the job orchestration core

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the job store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue database error.
    #[error("queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("input file {0} does not exist")]
    MissingInput(PathBuf),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the execution lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("execution lock is held")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while turning a job into an execution plan.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no workflow steps enabled")]
    NoStepsEnabled,

    #[error("invalid {tool} parameters: {source}")]
    Params {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by job submission.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by notifiers.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification relay returned {0}")]
    Status(reqwest::StatusCode),
}

/// Errors raised while loading worker configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{tool} timeout {budget:?} exceeds the absolute maximum of {max:?}")]
    BudgetTooLarge {
        tool: &'static str,
        budget: Duration,
        max: Duration,
    },
}
