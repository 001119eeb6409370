//! Coordinated freeze/unfreeze execution: binder handshake + cgroup/signal
//! suspension, behind a single advisory lock per daemon instance.
//!
//! The overall protocol is grounded on the original `ActionExecutor::freeze`/
//! `unfreeze` (`action_executor.cpp`); the lock itself reuses the teacher's
//! `ActionLock` (`action/executor.rs`) unchanged — flock-based, intentionally
//! never removing the lock file on drop to avoid a TOCTOU race against a
//! concurrently recreated inode.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use cerberus_common::{Error, InstanceKey, Pid, Result};

use super::binder::BinderCoordinator;
use super::freeze::{self, signal_fallback};

/// Result of a `freeze` call, mirroring §4.1's three-way contract.
#[derive(Debug)]
pub enum FreezeOutcome {
    /// Every pid is frozen (binder-coordinated, then cgroup or SIGSTOP).
    Ok,
    /// A transient condition (binder EAGAIN) was hit; every pid already
    /// advanced in this call has been rolled back. The caller should leave
    /// the instance in its prior state and retry next tick.
    Retry,
    /// A non-recoverable failure. Every pid already advanced in this call
    /// has been rolled back; the caller should force the instance to
    /// `Exempted`.
    Fatal(Error),
}

/// Drives the two-phase freeze protocol for a single app instance's pids.
pub struct FreezeExecutor {
    binder: BinderCoordinator,
    lock_path: PathBuf,
}

impl FreezeExecutor {
    /// Opens `/dev/binder` and probes coordination support, and enables the
    /// freezer controller in the cgroup v2 root subtree. `lock_path` is the
    /// advisory lock file guarding concurrent freeze/unfreeze calls from
    /// other processes (e.g. a manually invoked CLI action alongside the
    /// running daemon).
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        freeze::ensure_freezer_controller_enabled();
        FreezeExecutor { binder: BinderCoordinator::open(), lock_path: lock_path.into() }
    }

    pub fn freeze(&self, key: &InstanceKey, pids: &[Pid]) -> FreezeOutcome {
        if pids.is_empty() {
            return FreezeOutcome::Ok;
        }

        let _lock = match ActionLock::acquire(&self.lock_path) {
            Ok(lock) => lock,
            Err(err) => return FreezeOutcome::Fatal(err),
        };

        let mut advanced = Vec::new();
        for &pid in pids {
            match self.binder.coordinate(pid.0, true) {
                Ok(super::binder::BinderOpOutcome::Done) => advanced.push(pid),
                Ok(super::binder::BinderOpOutcome::Retry) => {
                    tracing::warn!(instance = %key, "binder coordination retryable, rolling back");
                    self.rollback(&advanced);
                    return FreezeOutcome::Retry;
                }
                Err(err) => {
                    tracing::error!(instance = %key, error = %err, "binder coordination failed fatally, rolling back");
                    self.rollback(&advanced);
                    return FreezeOutcome::Fatal(err);
                }
            }
        }

        tracing::info!(instance = %key, "binder phase complete, proceeding to physical freeze");
        match freeze::freeze_cgroup(key, pids) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(instance = %key, "cgroup v2 unavailable, falling back to SIGSTOP");
                signal_fallback::freeze(pids);
            }
            Err(err) => {
                tracing::warn!(instance = %key, error = %err, "cgroup freeze failed, falling back to SIGSTOP");
                signal_fallback::freeze(pids);
            }
        }

        FreezeOutcome::Ok
    }

    pub fn unfreeze(&self, key: &InstanceKey, pids: &[Pid]) -> Result<()> {
        let _lock = ActionLock::acquire(&self.lock_path)?;

        freeze::unfreeze_cgroup(key)?;
        signal_fallback::unfreeze(pids);

        for &pid in pids {
            let _ = self.binder.coordinate(pid.0, false);
        }

        tracing::info!(instance = %key, "unfroze instance");
        Ok(())
    }

    /// Reverses binder coordination for every pid already advanced in a
    /// call that is about to return `Retry` or `Fatal`.
    fn rollback(&self, advanced: &[Pid]) {
        for &pid in advanced {
            let _ = self.binder.coordinate(pid.0, false);
        }
    }
}

/// Advisory flock-based lock serializing freeze/unfreeze calls across
/// processes. Never removes the lock file on drop: deleting it would let a
/// second process create and lock a *different* inode at the same path
/// while this one still believes it holds the original lock.
struct ActionLock {
    file: std::fs::File,
}

impl ActionLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(Error::ActionRetry { pid: 0 });
                }
                return Err(Error::Io(err));
            }
        }

        let mut file = file;
        let _ = file.set_len(0);
        let _ = write!(file, "{}", std::process::id());
        let _ = file.flush();

        Ok(ActionLock { file })
    }
}

impl Drop for ActionLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerberus_common::UserId;
    use tempfile::tempdir;

    #[test]
    fn freeze_of_empty_pid_set_is_ok() {
        let dir = tempdir().unwrap();
        let executor = FreezeExecutor::new(dir.path().join("lock"));
        let key = InstanceKey::new("com.example.app", UserId(0));
        assert!(matches!(executor.freeze(&key, &[]), FreezeOutcome::Ok));
    }

    #[test]
    fn lock_is_exclusive_within_process() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        let first = ActionLock::acquire(&path).unwrap();
        let second = ActionLock::acquire(&path);
        assert!(second.is_err());
        drop(first);
        assert!(ActionLock::acquire(&path).is_ok());
    }

    #[test]
    fn lock_file_survives_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        {
            let _lock = ActionLock::acquire(&path).unwrap();
        }
        assert!(path.exists());
    }
}
