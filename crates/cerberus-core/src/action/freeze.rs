//! Phase 2 of the freeze protocol: cgroup-v2 freezer with a signal fallback.
//!
//! Extends the teacher's `action/freeze.rs`, which only ever read an
//! already-existing cgroup's `cgroup.freeze` file. This daemon instead owns
//! a per-instance cgroup it creates and tears down itself, grounded on the
//! original `action_executor.cpp`'s `freeze_cgroup`/`unfreeze_cgroup`/
//! `create_instance_cgroup`/`move_pids_to_cgroup`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cerberus_common::{Error, InstanceKey, Pid, Result};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

fn cgroup_v2_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| Path::new(CGROUP_ROOT).join("cgroup.controllers").exists())
}

/// Enables the `freezer` controller in the root subtree so per-instance
/// child cgroups may use it. Best-effort: a write failure usually means the
/// controller is already enabled.
pub fn ensure_freezer_controller_enabled() {
    if !cgroup_v2_available() {
        return;
    }
    let path = Path::new(CGROUP_ROOT).join("cgroup.subtree_control");
    if let Err(err) = fs::write(&path, "+freezer") {
        tracing::debug!(error = %err, "failed to enable freezer controller in root cgroup (may already be enabled)");
    }
}

fn instance_cgroup_path(key: &InstanceKey) -> PathBuf {
    Path::new(CGROUP_ROOT).join(key.cgroup_dir_name())
}

/// Creates (if absent), populates, and freezes the per-instance cgroup.
/// Returns `Ok(false)` rather than an `Error` when cgroup v2 itself is
/// unavailable, so the caller can fall through to the `SIGSTOP` fallback
/// without treating the absence of cgroup v2 as a hard failure.
pub fn freeze_cgroup(key: &InstanceKey, pids: &[Pid]) -> Result<bool> {
    if !cgroup_v2_available() {
        return Ok(false);
    }
    let path = instance_cgroup_path(key);
    create_instance_cgroup(&path).map_err(|reason| Error::CgroupFailed { instance: key.to_string(), reason })?;
    move_pids_to_cgroup(pids, &path).map_err(|reason| Error::CgroupFailed { instance: key.to_string(), reason })?;
    write_freeze(&path, true).map_err(|reason| Error::CgroupFailed { instance: key.to_string(), reason })?;
    Ok(true)
}

/// Thaws and tears down the per-instance cgroup: writes `cgroup.freeze=0`,
/// drains any surviving pids back to the root cgroup, then removes the now
/// (hopefully) empty directory. Directory removal failure is logged, not
/// propagated — a straggling pid keeping the directory alive is expected
/// and will be retried on the next unfreeze.
pub fn unfreeze_cgroup(key: &InstanceKey) -> Result<()> {
    if !cgroup_v2_available() {
        return Ok(());
    }
    let path = instance_cgroup_path(key);
    if !path.exists() {
        return Ok(());
    }

    let _ = write_freeze(&path, false);

    let procs_path = path.join("cgroup.procs");
    if let Ok(contents) = fs::read_to_string(&procs_path) {
        let pids: Vec<Pid> = contents.lines().filter_map(|l| l.trim().parse::<u32>().ok()).map(Pid).collect();
        if !pids.is_empty() {
            let root = PathBuf::from(CGROUP_ROOT);
            let _ = move_pids_to_cgroup(&pids, &root);
        }
    }

    if let Err(err) = fs::remove_dir(&path) {
        tracing::warn!(instance = %key, error = %err, "cannot remove instance cgroup, may not be empty yet");
    }
    Ok(())
}

fn create_instance_cgroup(path: &Path) -> std::result::Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    fs::create_dir(path).map_err(|e| e.to_string())
}

fn move_pids_to_cgroup(pids: &[Pid], cgroup_path: &Path) -> std::result::Result<(), String> {
    use std::io::Write;
    let procs_path = cgroup_path.join("cgroup.procs");
    let mut file = fs::OpenOptions::new().append(true).open(&procs_path).map_err(|e| e.to_string())?;
    for pid in pids {
        writeln!(file, "{}", pid.0).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn write_freeze(path: &Path, freeze: bool) -> std::result::Result<(), String> {
    let value = if freeze { "1" } else { "0" };
    fs::write(path.join("cgroup.freeze"), value).map_err(|e| e.to_string())
}

/// SIGSTOP/SIGCONT fallback used when cgroup v2 is unavailable or a
/// cgroup-freeze step fails partway through.
pub mod signal_fallback {
    use super::*;

    pub fn freeze(pids: &[Pid]) {
        for pid in pids {
            if let Err(err) = crate::action::signal::send_signal(pid.0, libc::SIGSTOP) {
                tracing::warn!(pid = pid.0, error = %err, "failed to SIGSTOP pid during cgroup fallback");
            }
        }
    }

    pub fn unfreeze(pids: &[Pid]) {
        for pid in pids {
            let _ = crate::action::signal::send_signal(pid.0, libc::SIGCONT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_instance_cgroup_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cerberus_com_example_app_0");
        create_instance_cgroup(&path).unwrap();
        assert!(path.exists());
        // Creating again over an existing directory is success, per §8's
        // boundary-behaviour requirement.
        create_instance_cgroup(&path).unwrap();
    }

    #[test]
    fn move_pids_writes_one_per_line() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.path().join("cgroup.procs"), "").unwrap();
        move_pids_to_cgroup(&[Pid(100), Pid(200)], dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("cgroup.procs")).unwrap();
        assert_eq!(contents, "100\n200\n");
    }

    #[test]
    fn write_freeze_toggles_value() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cgroup.freeze"), "0").unwrap();
        write_freeze(dir.path(), true).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("cgroup.freeze")).unwrap(), "1");
        write_freeze(dir.path(), false).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("cgroup.freeze")).unwrap(), "0");
    }
}
