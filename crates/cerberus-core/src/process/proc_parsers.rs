//! Resolves a kernel pid to an app-instance key by reading `/proc/<pid>`.
//!
//! Grounded on the original daemon's `get_package_name_from_pid`: the owning
//! uid comes from `stat()`-ing the `/proc/<pid>` directory itself (its owner
//! is the process's effective uid), not from parsing `/proc/<pid>/status`.
//! The package name comes from `cmdline`, trimmed at the first `:` (process
//! variant, e.g. `:remote`) and `@` (isolated-process suffix).

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use cerberus_common::{user_id_from_uid, InstanceKey, Pid, UserId};

/// A PID's resolved owner, before any instance grouping is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: u32,
    pub user_id: UserId,
    pub package_name: String,
}

/// Reads `/proc/<pid>/cmdline` and `stat()`s `/proc/<pid>` to resolve the
/// owning app instance. Returns `None` for kernel threads (empty cmdline),
/// pids that have already exited, or anything unreadable.
pub fn resolve_pid(pid: Pid) -> Option<ResolvedIdentity> {
    resolve_pid_under(Path::new("/proc"), pid)
}

fn resolve_pid_under(proc_root: &Path, pid: Pid) -> Option<ResolvedIdentity> {
    let proc_dir = proc_root.join(pid.0.to_string());
    let metadata = fs::metadata(&proc_dir).ok()?;
    let uid = metadata.uid();

    let cmdline_raw = fs::read(proc_dir.join("cmdline")).ok()?;
    let package_name = parse_cmdline_package(&cmdline_raw)?;

    Some(ResolvedIdentity {
        uid,
        user_id: user_id_from_uid(uid),
        package_name,
    })
}

/// Extracts the package name from raw `/proc/<pid>/cmdline` bytes.
///
/// `cmdline` is NUL-separated argv; the first argument is the process name
/// on Android (`app_process` execs re-exec themselves with `argv[0]` set to
/// the package name or a `package:process` / `package@isolated` variant).
fn parse_cmdline_package(raw: &[u8]) -> Option<String> {
    let first = raw.split(|&b| b == 0).next()?;
    let mut s = String::from_utf8_lossy(first).into_owned();
    if s.is_empty() {
        return None;
    }
    if let Some(pos) = s.find(':') {
        s.truncate(pos);
    }
    if let Some(pos) = s.find('@') {
        s.truncate(pos);
    }
    if s.is_empty() {
        return None;
    }
    Some(s)
}

impl ResolvedIdentity {
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.package_name.clone(), self.user_id)
    }
}

/// Enumerates every numeric entry in `/proc` for the initial scan.
pub fn scan_all_pids() -> Vec<Pid> {
    scan_all_pids_under(Path::new("/proc"))
}

fn scan_all_pids_under(proc_root: &Path) -> Vec<Pid> {
    let mut pids = Vec::new();
    let Ok(entries) = fs::read_dir(proc_root) else {
        return pids;
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(pid) = name.parse::<u32>() {
                pids.push(Pid(pid));
            }
        }
    }
    pids
}
