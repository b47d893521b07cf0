use crate::file_lock::{FileLock, LockError};
use agent_deck_core::Request;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Request not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared, file-backed ordered collection of pending execution requests.
///
/// Every mutation takes the exclusive lock, reads the current contents,
/// applies the change, and writes the whole file back through a temp file
/// renamed into place, so a lock-free reader never observes a torn file.
pub struct RequestQueue {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl RequestQueue {
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

    pub fn enqueue(&self, request: Request) -> Result<(), QueueError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut requests = self.read_all();
        tracing::info!(id = %request.id, agent = %request.agent, user = %request.user, "enqueue request");
        requests.push(request);
        self.write_all(&requests)
    }

    /// Removes the request with the given id and returns it. `NotFound`
    /// when another actor already resolved it before the lock was taken.
    pub fn resolve(&self, id: &str) -> Result<Request, QueueError> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut requests = self.read_all();
        let position = requests
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let resolved = requests.remove(position);
        self.write_all(&requests)?;
        tracing::info!(id = %resolved.id, agent = %resolved.agent, "resolved request");
        Ok(resolved)
    }

    /// Lock-free listing. A missing or momentarily unparseable file reads
    /// as empty; callers refresh on demand.
    pub fn list(&self) -> Vec<Request> {
        self.read_all()
    }

    fn read_all(&self) -> Vec<Request> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn write_all(&self, requests: &[Request]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(requests)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
