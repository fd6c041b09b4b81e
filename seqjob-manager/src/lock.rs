//! System-wide execution lock
//!
//! The token is written to a private temp file and then hard-linked into
//! place, so two workers can never both acquire it and a visible token is
//! always complete. It records the holder pid and acquisition time. A token
//! whose pid is gone, or that is older than the staleness window, is stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LockError;

/// Contents of the lock token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockToken {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutionLock {
    path: PathBuf,
}

impl ExecutionLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without blocking; `LockError::Busy` when already held
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.is_held() {
            return Err(LockError::Busy);
        }

        let token = LockToken {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let staging = self.staging_path();
        let bytes = serde_json::to_vec(&token).map_err(io::Error::from)?;
        fs::write(&staging, bytes)?;

        let linked = fs::hard_link(&staging, &self.path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Busy)
            }
            Err(err) => return Err(LockError::Io(err)),
        }

        debug!(path = %self.path.display(), "execution lock acquired");
        Ok(LockGuard {
            lock: self.clone(),
            released: false,
        })
    }

    /// Remove the token; removing an absent token is a no-op
    pub fn release(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "execution lock released");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LockError::Io(err)),
        }
    }

    /// Current token, if any. An unreadable token yields `None`.
    pub fn holder(&self) -> Option<LockToken> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Remove a token whose holder is no longer alive, one older than
    /// `max_age`, or one that cannot be parsed. Returns whether a token was
    /// cleared.
    pub fn clear_stale(&self, max_age: Duration) -> Result<bool, LockError> {
        self.clear_if_stale(Some(max_age))
    }

    /// Like `clear_stale` but ignores the token's age, so a live holder
    /// running a long job is never displaced
    pub fn clear_abandoned(&self) -> Result<bool, LockError> {
        self.clear_if_stale(None)
    }

    fn clear_if_stale(&self, max_age: Option<Duration>) -> Result<bool, LockError> {
        if !self.is_held() {
            return Ok(false);
        }

        let stale = match (self.holder(), max_age) {
            (Some(token), _) if !pid_alive(token.pid) => {
                warn!(pid = token.pid, "execution lock holder is gone");
                true
            }
            (Some(token), Some(max_age)) => {
                let age = Utc::now().signed_duration_since(token.acquired_at);
                age.to_std().map(|age| age > max_age).unwrap_or(false)
            }
            (Some(_), None) => false,
            (None, _) => true,
        };

        if stale {
            warn!(path = %self.path.display(), "clearing stale execution lock");
            self.release()?;
        }
        Ok(stale)
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        self.path.with_file_name(format!(
            ".{}.{}.{}",
            name,
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ))
    }
}

/// Whether a process with this pid still exists
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // signal 0 only checks for existence; EPERM means it exists under another user
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

/// Releases the lock when dropped
#[derive(Debug)]
pub struct LockGuard {
    lock: ExecutionLock,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.lock.release() {
                warn!(error = %err, "failed to release execution lock");
            }
        }
    }
}
