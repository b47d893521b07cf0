use crate::file_lock::{FileLock, LockError};
use agent_deck_core::AuditEntry;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AuditLogError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only, line-oriented record of every execution attempt. Appends
/// from dashboard sessions and the command-line approval tool all go
/// through the same lock file, so partial lines never interleave.
pub struct AuditLog {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditLogError> {
        let json = serde_json::to_string(entry)?;
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Last `limit` entries, oldest first. Unparseable lines are skipped
    /// rather than failing the whole read.
    pub fn tail(&self, limit: usize) -> Vec<AuditEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        let entries: Vec<AuditEntry> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = entries.len().saturating_sub(limit);
        entries.into_iter().skip(skip).collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
