use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock timeout on {0}")]
    Timeout(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock on a dedicated lock file. The queue and the
/// audit log are mutated by multiple processes (dashboard sessions and the
/// command-line approval tool), so mutual exclusion has to work across
/// process boundaries; flock gives that where an in-process mutex cannot.
///
/// Acquisition is non-blocking with bounded retry so a contended lock
/// surfaces as a timeout instead of wedging the owning session. Released
/// on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn acquire<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_flock_exclusive(&file)? {
                return Ok(Self { file, path });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout(path));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        flock_unlock(&self.file);
    }
}

/// Try to acquire an exclusive flock (non-blocking). `Ok(false)` means the
/// file is locked by another holder.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock is a standard POSIX call and fd is a valid
        // descriptor owned by `file`.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn flock_unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: see try_flock_exclusive.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
}
