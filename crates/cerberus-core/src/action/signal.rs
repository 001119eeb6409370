//! Raw signal delivery and `/proc`-based process liveness checks.
//!
//! Retargeted from the teacher's `action/signal.rs`: kept its `send_signal`
//! error mapping, `process_exists`, and `get_process_state` techniques, but
//! dropped the pause/kill/resume action-runner abstraction (there is no
//! kill/restart action in this daemon) in favor of the plain functions
//! `action::freeze::signal_fallback` calls per-pid.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use cerberus_common::{Error, Result};

/// Sends `signal` to `pid`, mapping kernel errors onto the shared error
/// taxonomy the way the teacher's `SignalActionRunner::send_signal` does.
pub fn send_signal(pid: u32, signal: i32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, signal) };
    if result == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    let reason = match err.raw_os_error() {
        Some(libc::ESRCH) => "process not found".to_string(),
        Some(libc::EPERM) => return Err(Error::PermissionDenied { operation: format!("kill(pid={pid}, sig={signal})") }),
        Some(libc::EINVAL) => "invalid signal".to_string(),
        _ => err.to_string(),
    };
    Err(Error::SignalFailed { pid, reason })
}

/// Whether `pid` still exists. `EPERM` counts as existing: we just can't
/// signal it.
pub fn process_exists(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Reads the single-character process state field out of `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
pub fn get_process_state(pid: u32) -> Option<char> {
    let stat_path = PathBuf::from(format!("/proc/{pid}/stat"));
    let content = std::fs::read_to_string(&stat_path).ok()?;
    let comm_end = content.rfind(')')?;
    let after_comm = content.get(comm_end + 2..)?;
    after_comm.chars().next()
}

#[cfg(not(target_os = "linux"))]
pub fn get_process_state(_pid: u32) -> Option<char> {
    None
}

/// Polls until `pid` is stopped (state `T`/`t`) or exits, per `expect_exit`.
pub fn wait_for_state(pid: u32, expect_exit: bool, poll_interval: Duration, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if expect_exit {
            if !process_exists(pid) {
                return true;
            }
        } else if let Some(state) = get_process_state(pid) {
            if state == 'T' || state == 't' {
                return true;
            }
        }
        std::thread::sleep(poll_interval);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_exists_for_self() {
        assert!(process_exists(std::process::id()));
    }

    #[test]
    fn process_not_exists_for_invalid() {
        assert!(!process_exists(999_999_999));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn get_process_state_for_self() {
        let state = get_process_state(std::process::id());
        assert!(matches!(state, Some('R') | Some('S') | Some('D')));
    }

    #[test]
    fn send_signal_to_invalid_pid_is_signal_failed() {
        let err = send_signal(999_999_999, libc::SIGSTOP).unwrap_err();
        assert_eq!(err.code(), 32);
    }

    #[cfg(unix)]
    #[test]
    fn can_pause_and_resume_child() {
        use std::process::Command;

        let mut child = Command::new("sleep").arg("60").spawn().expect("failed to spawn sleep");
        let pid = child.id();

        send_signal(pid, libc::SIGSTOP).unwrap();

        #[cfg(target_os = "linux")]
        {
            let stopped = wait_for_state(pid, false, Duration::from_millis(10), Duration::from_millis(500));
            assert!(stopped, "expected stopped state");
        }

        send_signal(pid, libc::SIGCONT).unwrap();

        let _ = child.kill();
        let _ = child.wait();
    }
}
