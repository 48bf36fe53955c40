//! core::ops::lock
//!
//! Exclusive working copy lock for landing sessions.
//!
//! # Architecture
//!
//! The lock ensures only one session can mutate a working copy at a time.
//! It is an OS-level advisory lock (`fs2`, `flock(2)` on Unix) on
//! `<root>/.hg/hgland/lock`, so it excludes other processes as well as
//! other threads of the same process: each acquisition opens its own file
//! description.
//!
//! # Invariants
//!
//! - Lock must be held for the entire session
//! - Lock is automatically released on drop (RAII pattern)
//! - The OS drops the lock if the holder dies, so a crash never leaves a
//!   stale lock behind
//!
//! # Example
//!
//! ```ignore
//! use hgland::core::ops::lock::{LockPolicy, WorkingCopyLock};
//! use hgland::core::paths::HgPaths;
//!
//! let paths = HgPaths::new("/srv/clones/central".into());
//! let lock = WorkingCopyLock::acquire_with(&paths, LockPolicy::FailFast)?;
//!
//! // Mutate the working copy while holding the lock
//! // ...
//!
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::HgPaths;

/// Interval between acquisition attempts when waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another session already holds the lock.
    #[error("working copy is locked by another session")]
    AlreadyLocked,

    /// Waited for the lock and gave up.
    #[error("timed out after {waited:?} waiting for the working copy lock")]
    WaitTimedOut { waited: Duration },

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// What to do when the working copy is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Return [`LockError::AlreadyLocked`] immediately.
    #[default]
    FailFast,
    /// Poll until the lock frees up or the duration elapses.
    Wait(Duration),
}

/// An exclusive lock on a working copy.
///
/// Released when dropped, even if the session panics.
#[derive(Debug)]
pub struct WorkingCopyLock {
    path: PathBuf,
    /// `Some` while the lock is held.
    file: Option<File>,
}

impl WorkingCopyLock {
    /// Attempt to acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if another session holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(paths: &HgPaths) -> Result<Self, LockError> {
        let state_dir = paths.state_dir();
        fs::create_dir_all(&state_dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", state_dir.display(), e))
        })?;

        let path = paths.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if is_contended(&e) => Err(LockError::AlreadyLocked),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Acquire the lock according to `policy`.
    ///
    /// # Errors
    ///
    /// As [`WorkingCopyLock::acquire`], plus [`LockError::WaitTimedOut`] when
    /// a [`LockPolicy::Wait`] deadline passes.
    pub fn acquire_with(paths: &HgPaths, policy: LockPolicy) -> Result<Self, LockError> {
        let limit = match policy {
            LockPolicy::FailFast => return Self::acquire(paths),
            LockPolicy::Wait(limit) => limit,
        };

        let start = Instant::now();
        loop {
            match Self::acquire(paths) {
                Err(LockError::AlreadyLocked) => {
                    let waited = start.elapsed();
                    if waited >= limit {
                        return Err(LockError::WaitTimedOut { waited });
                    }
                    thread::sleep(POLL_INTERVAL.min(limit - waited));
                }
                other => return other,
            }
        }
    }

    /// Try to acquire the lock, returning `None` if already held.
    pub fn try_acquire(paths: &HgPaths) -> Result<Option<Self>, LockError> {
        match Self::acquire(paths) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::AlreadyLocked) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before the guard goes out of scope.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WorkingCopyLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
