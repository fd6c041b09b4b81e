//! Worker configuration
//!
//! Resolved once at startup from `SEQJOB_*` environment variables (a `.env`
//! file is loaded first by the binary), then overridden by CLI flags through
//! the `with_*` builders. `validate` enforces the absolute runtime cap.

use seqjob_manager_sdk::Tool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Hard cap on any per-tool timeout (4 hours)
pub const ABSOLUTE_MAX_RUNTIME: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_XTREE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAGUS_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Whether steps launch real binaries or are simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Real,
    Stub,
}

/// Settings for the worker loop and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Root of the job store (queue.db, jobs/, job.lock).
    pub data_dir: PathBuf,

    /// Sleep between polls of an empty queue.
    /// Default: 2 seconds
    pub poll_interval: Duration,

    /// Minimum time between retention sweeps.
    /// Default: 1 hour
    pub sweep_interval: Duration,

    /// Jobs older than this are purged regardless of status.
    /// Default: 7 days
    pub retention: Duration,

    /// Age after which a lock token or a `running` job is considered
    /// orphaned at startup.
    /// Default: the absolute runtime cap
    pub stale_after: Duration,

    pub magus_path: PathBuf,
    pub xtree_path: PathBuf,

    /// Per-subprocess wall-clock budgets.
    pub magus_timeout: Duration,
    pub xtree_timeout: Duration,

    pub mode: ExecutionMode,

    /// Simulated runtime of one step in stub mode.
    /// Default: 2 seconds
    pub stub_delay: Duration,

    /// Mail relay endpoint; notifications are only logged when unset.
    pub webhook_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: DEFAULT_RETENTION,
            stale_after: ABSOLUTE_MAX_RUNTIME,
            magus_path: PathBuf::from("magus"),
            xtree_path: PathBuf::from("xtree"),
            magus_timeout: DEFAULT_MAGUS_TIMEOUT,
            xtree_timeout: DEFAULT_XTREE_TIMEOUT,
            mode: ExecutionMode::Real,
            stub_delay: Duration::from_secs(2),
            webhook_url: None,
        }
    }
}

/// Platform data directory, falling back to `./.seqjob`
pub fn default_data_dir() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("org", "seqjob", "seqjob-manager") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".seqjob")
    }
}

impl WorkerConfig {
    /// Creates a WorkerConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SEQJOB_*` process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("SEQJOB_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("SEQJOB_MAGUS_BIN") {
            config.magus_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SEQJOB_XTREE_BIN") {
            config.xtree_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEQJOB_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEQJOB_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(days) = parse_var::<u64, _>(&lookup, "SEQJOB_RETENTION_DAYS")? {
            config.retention = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEQJOB_STALE_AFTER_SECS")? {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEQJOB_MAGUS_TIMEOUT_SECS")? {
            config.magus_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SEQJOB_XTREE_TIMEOUT_SECS")? {
            config.xtree_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SEQJOB_STUB_DELAY_MS")? {
            config.stub_delay = Duration::from_millis(ms);
        }
        if let Some(url) = lookup("SEQJOB_WEBHOOK_URL").filter(|url| !url.trim().is_empty()) {
            config.webhook_url = Some(url);
        }

        let stubs = match lookup("SEQJOB_USE_STUBS") {
            Some(value) => Some(parse_bool("SEQJOB_USE_STUBS", &value)?),
            None => match lookup("USE_EXECUTION_STUBS") {
                Some(value) => Some(parse_bool("USE_EXECUTION_STUBS", &value)?),
                None => None,
            },
        };
        if stubs == Some(true) {
            config.mode = ExecutionMode::Stub;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check timeouts against the absolute cap and reject zero intervals
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tool, budget) in [
            ("XTree", self.xtree_timeout),
            ("MAGUS", self.magus_timeout),
        ] {
            if budget > ABSOLUTE_MAX_RUNTIME {
                return Err(ConfigError::BudgetTooLarge {
                    tool,
                    budget,
                    max: ABSOLUTE_MAX_RUNTIME,
                });
            }
            if budget.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: format!("{} timeout", tool),
                    value: "0".to_string(),
                });
            }
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll interval".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Wall-clock budget for one subprocess of `tool`
    pub fn timeout_for(&self, tool: Tool) -> Duration {
        match tool {
            Tool::Magus => self.magus_timeout,
            Tool::Xtree => self.xtree_timeout,
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("job.lock")
    }

    /// Sets the job store root.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the empty-queue poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Sets the MAGUS and XTree binaries.
    pub fn with_binaries(mut self, magus: impl Into<PathBuf>, xtree: impl Into<PathBuf>) -> Self {
        self.magus_path = magus.into();
        self.xtree_path = xtree.into();
        self
    }

    /// Sets the per-tool timeouts. Call `validate` afterwards.
    pub fn with_timeouts(mut self, magus: Duration, xtree: Duration) -> Self {
        self.magus_timeout = magus;
        self.xtree_timeout = xtree;
        self
    }

    pub fn with_stub_delay(mut self, delay: Duration) -> Self {
        self.stub_delay = delay;
        self
    }

    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
