//! Durable job store: job directories plus a SQLite-backed FIFO queue
//!
//! # Layout
//!
//! ```text
//! <root>/queue.db               queue (WAL mode)
//! <root>/jobs/<id>/meta.json    JobMeta, written once
//! <root>/jobs/<id>/params.json  tool parameters
//! <root>/jobs/<id>/status.json  JobStatus, replaced atomically
//! <root>/jobs/<id>/input/       upload and optional mapping file
//! <root>/jobs/<id>/output/      tool working directory
//! <root>/jobs/<id>/stdout.log   step-labelled transcript
//! <root>/jobs/<id>/command.txt  argv of every step
//! ```
//!
//! JSON files are written to a temp file and renamed into place, so readers
//! never observe a partial document. The queue lives in SQLite so dequeue is
//! a single immediate transaction and cannot race a concurrent enqueue.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use seqjob_manager::store::{JobStore, NewJob};
//! use seqjob_manager_sdk::Tool;
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = JobStore::open("/var/lib/seqjob")?;
//! let id = store.create_job(NewJob {
//!     tool: Tool::Xtree,
//!     email: "user@example.org".to_string(),
//!     mode: Some("ALIGN".to_string()),
//!     params: serde_json::json!({ "mode": "ALIGN" }),
//!     input: PathBuf::from("/tmp/upload/reads.fa"),
//!     mapping: None,
//! })?;
//! store.enqueue(id)?;
//!
//! if let Some(next) = store.dequeue()? {
//!     println!("claimed {}", next);
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use seqjob_manager_sdk::{JobMeta, JobStatus, Tool};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

const QUEUE_DB_FILE: &str = "queue.db";
const JOBS_DIR: &str = "jobs";
const META_FILE: &str = "meta.json";
const PARAMS_FILE: &str = "params.json";
const STATUS_FILE: &str = "status.json";
const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "output";
const TRANSCRIPT_FILE: &str = "stdout.log";
const COMMAND_FILE: &str = "command.txt";

/// Queue schema version written by this build
const SCHEMA_VERSION: i32 = 1;

/// Everything needed to create a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tool: Tool,
    pub email: String,
    pub mode: Option<String>,
    pub params: serde_json::Value,
    /// Validated upload, copied into the job directory
    pub input: PathBuf,
    /// Optional mapping file (XTree BUILD)
    pub mapping: Option<PathBuf>,
}

/// Metadata and current status of one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub meta: JobMeta,
    pub status: JobStatus,
}

/// Filesystem + SQLite job store
pub struct JobStore {
    root: PathBuf,
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(JOBS_DIR))?;

        let conn = Connection::open(root.join(QUEUE_DB_FILE))?;

        // Enable WAL mode for concurrent submitters and the worker
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self {
            root,
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.conn();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                -- Monotonic position, defines FIFO order
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL UNIQUE,
                enqueued_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> StoreResult<i32> {
        let version: i32 =
            self.conn()
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?;
        Ok(version)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(JOBS_DIR).join(id.to_string())
    }

    /// Working directory handed to the tool
    pub fn output_dir(&self, id: Uuid) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR)
    }

    pub fn transcript_path(&self, id: Uuid) -> PathBuf {
        self.job_dir(id).join(TRANSCRIPT_FILE)
    }

    // ------------------------------------------------------------------
    // Creation and queue
    // ------------------------------------------------------------------

    /// Persist a new job in `queued` state. Does not enqueue it.
    pub fn create_job(&self, job: NewJob) -> StoreResult<Uuid> {
        if !job.input.is_file() {
            return Err(StoreError::MissingInput(job.input));
        }
        if let Some(mapping) = &job.mapping {
            if !mapping.is_file() {
                return Err(StoreError::MissingInput(mapping.clone()));
            }
        }

        let id = Uuid::new_v4();
        let dir = self.job_dir(id);
        let input_dir = dir.join(INPUT_DIR);
        fs::create_dir_all(&input_dir)?;
        fs::create_dir_all(dir.join(OUTPUT_DIR))?;

        let input_file = file_name_or(&job.input, "upload");
        fs::copy(&job.input, input_dir.join(&input_file))?;

        let mapping_file = match &job.mapping {
            Some(mapping) => {
                let mut name = file_name_or(mapping, "mapping");
                if name == input_file {
                    name = format!("mapping-{}", name);
                }
                fs::copy(mapping, input_dir.join(&name))?;
                Some(name)
            }
            None => None,
        };

        let meta = JobMeta {
            id,
            tool: job.tool,
            email: job.email,
            created_at: Utc::now(),
            mode: job.mode,
            input_file,
            mapping_file,
        };

        write_json_atomic(&dir.join(PARAMS_FILE), &job.params)?;
        write_json_atomic(&dir.join(STATUS_FILE), &JobStatus::queued())?;
        // meta last: a directory without meta.json is an incomplete job
        write_json_atomic(&dir.join(META_FILE), &meta)?;

        debug!(job_id = %id, tool = %meta.tool, "job created");
        Ok(id)
    }

    /// Append a job id at the tail of the queue
    pub fn enqueue(&self, id: Uuid) -> StoreResult<()> {
        if !self.job_dir(id).join(META_FILE).is_file() {
            return Err(StoreError::NotFound(id));
        }

        self.conn().execute(
            "INSERT OR IGNORE INTO queue (job_id, enqueued_at) VALUES (?1, ?2)",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove and return the head of the queue
    pub fn dequeue(&self) -> StoreResult<Option<Uuid>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, job_id FROM queue ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, job_id)) = head else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute("DELETE FROM queue WHERE seq = ?1", params![seq])?;
        tx.commit()?;

        Ok(Some(parse_id(job_id)?))
    }

    /// Queued ids, head first
    pub fn queued_ids(&self) -> StoreResult<Vec<Uuid>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT job_id FROM queue ORDER BY seq ASC")?;
        let ids = stmt
            .query_map([], |row| parse_id(row.get(0)?))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn queue_len(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Job documents
    // ------------------------------------------------------------------

    pub fn load_meta(&self, id: Uuid) -> StoreResult<JobMeta> {
        self.read_job_json(id, META_FILE)
    }

    pub fn load_params(&self, id: Uuid) -> StoreResult<serde_json::Value> {
        self.read_job_json(id, PARAMS_FILE)
    }

    pub fn load_status(&self, id: Uuid) -> StoreResult<JobStatus> {
        self.read_job_json(id, STATUS_FILE)
    }

    /// Replace the job status after validating the transition
    pub fn set_status(&self, id: Uuid, status: JobStatus) -> StoreResult<()> {
        let current = self.load_status(id)?;
        if !current.can_transition_to(&status) {
            return Err(StoreError::IllegalTransition {
                id,
                from: current.label(),
                to: status.label(),
            });
        }

        write_json_atomic(&self.job_dir(id).join(STATUS_FILE), &status)?;
        debug!(job_id = %id, status = status.label(), "status updated");
        Ok(())
    }

    pub fn input_path(&self, id: Uuid) -> StoreResult<PathBuf> {
        let meta = self.load_meta(id)?;
        let path = self.job_dir(id).join(INPUT_DIR).join(meta.input_file);
        if !path.is_file() {
            return Err(StoreError::MissingInput(path));
        }
        Ok(path)
    }

    pub fn mapping_path(&self, id: Uuid) -> StoreResult<Option<PathBuf>> {
        let meta = self.load_meta(id)?;
        Ok(meta
            .mapping_file
            .map(|name| self.job_dir(id).join(INPUT_DIR).join(name)))
    }

    pub fn write_command(&self, id: Uuid, text: &str) -> StoreResult<()> {
        write_atomic(&self.job_dir(id).join(COMMAND_FILE), text.as_bytes())?;
        Ok(())
    }

    pub fn write_transcript(&self, id: Uuid, text: &str) -> StoreResult<()> {
        write_atomic(&self.transcript_path(id), text.as_bytes())?;
        Ok(())
    }

    pub fn read_transcript(&self, id: Uuid) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.transcript_path(id)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    // ------------------------------------------------------------------
    // Listing, retention and recovery
    // ------------------------------------------------------------------

    /// All readable jobs, oldest first. Malformed directories are skipped.
    pub fn list_jobs(&self) -> StoreResult<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        for id in self.job_ids()? {
            let record = self
                .load_meta(id)
                .and_then(|meta| Ok((meta, self.load_status(id)?)));
            match record {
                Ok((meta, status)) => jobs.push(JobRecord { meta, status }),
                Err(err) => {
                    warn!(job_id = %id, error = %err, "skipping malformed job directory");
                }
            }
        }
        jobs.sort_by_key(|job| job.meta.created_at);
        Ok(jobs)
    }

    /// Jobs created more than `retention` ago, whatever their status
    pub fn list_expired(&self, retention: Duration) -> StoreResult<Vec<Uuid>> {
        let cutoff = cutoff(retention);
        let mut expired = Vec::new();

        for id in self.job_ids()? {
            match self.load_meta(id) {
                Ok(meta) if meta.created_at < cutoff => expired.push(id),
                Ok(_) => {}
                Err(err) => {
                    warn!(job_id = %id, error = %err, "skipping malformed job directory");
                }
            }
        }

        Ok(expired)
    }

    /// Delete a job directory and any queue entry. Missing jobs are a no-op.
    pub fn purge(&self, id: Uuid) -> StoreResult<()> {
        self.conn().execute(
            "DELETE FROM queue WHERE job_id = ?1",
            params![id.to_string()],
        )?;

        match fs::remove_dir_all(self.job_dir(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// `running` jobs whose `started_at` is older than `max_age`
    pub fn find_stale_running(&self, max_age: Duration) -> StoreResult<Vec<Uuid>> {
        let cutoff = cutoff(max_age);
        let mut stale = Vec::new();

        for id in self.job_ids()? {
            match self.load_status(id) {
                Ok(JobStatus::Running { started_at }) if started_at < cutoff => stale.push(id),
                Ok(_) => {}
                Err(err) => {
                    warn!(job_id = %id, error = %err, "skipping malformed job directory");
                }
            }
        }

        Ok(stale)
    }

    fn job_ids(&self) -> StoreResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(JOBS_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match Uuid::parse_str(&name.to_string_lossy()) {
                Ok(id) => ids.push(id),
                Err(_) => {
                    warn!(path = %entry.path().display(), "ignoring non-job directory");
                }
            }
        }
        Ok(ids)
    }

    fn read_job_json<T: DeserializeOwned>(&self, id: Uuid, file: &str) -> StoreResult<T> {
        let path = self.job_dir(id).join(file);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_id(raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn file_name_or(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
