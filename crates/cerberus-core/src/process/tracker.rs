//! PID ↔ instance map.
//!
//! Consumes an abstract event stream (`ProcEvent`) standing in for the
//! kernel connector's fork/exec/exit notifications, plus a one-shot
//! `/proc` scan at startup. Grounded on the original `StateManager`'s
//! `add_pid_to_app`/`remove_pid_from_app`/`reconcile_process_state_full`,
//! split out here as a standalone collaborator the instance state machine
//! drives rather than a god-object method set.

use std::collections::HashMap;

use cerberus_common::{InstanceKey, Pid};

use super::proc_parsers::{resolve_pid, scan_all_pids};

/// A fork/exec/exit notification, normally sourced from a kernel connector
/// netlink socket; tests and `initial_scan` synthesize them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcEvent {
    Fork { child_pid: Pid, parent_pid: Pid },
    Exec { pid: Pid },
    Exit { pid: Pid },
}

/// Outcome of applying a single event, consumed by the instance state
/// machine to drive transitions without the tracker knowing about states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEffect {
    /// A pid was newly associated with `key` (instance created if absent).
    PidAdded { key: InstanceKey, pid: Pid, uid: u32 },
    /// A pid left `key`'s pid set; `now_empty` signals a `Stopped` transition.
    PidRemoved { key: InstanceKey, pid: Pid, now_empty: bool },
    /// The event resolved to no instance (kernel thread, vanished pid) and
    /// was ignored.
    Ignored,
}

/// Maintains the live pid → instance mapping.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    pid_index: HashMap<Pid, InstanceKey>,
    instances: HashMap<InstanceKey, Vec<Pid>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        ProcessTracker::default()
    }

    /// One-shot enumeration of `/proc/<pid>` at startup.
    pub fn initial_scan(&mut self) -> Vec<TrackerEffect> {
        scan_all_pids()
            .into_iter()
            .filter_map(|pid| self.add_pid(pid))
            .collect()
    }

    /// Idempotent mutation of the pid ↔ instance map for one event.
    pub fn on_event(&mut self, event: ProcEvent) -> TrackerEffect {
        match event {
            ProcEvent::Exec { pid } => self.add_pid(pid).unwrap_or(TrackerEffect::Ignored),
            ProcEvent::Fork { child_pid, parent_pid } => self.on_fork(child_pid, parent_pid),
            ProcEvent::Exit { pid } => self.on_exit(pid),
        }
    }

    fn on_fork(&mut self, child_pid: Pid, parent_pid: Pid) -> TrackerEffect {
        // Closes the race where the child is observed before its own
        // /proc/<pid>/cmdline is populated: if the resolved package matches
        // the parent's, inherit the parent's instance directly.
        if let Some(parent_key) = self.pid_index.get(&parent_pid).cloned() {
            if let Some(resolved) = resolve_pid(child_pid) {
                if resolved.package_name == parent_key.package_name {
                    return self.insert(parent_key, child_pid, resolved.uid);
                }
            }
        }
        self.add_pid(child_pid).unwrap_or(TrackerEffect::Ignored)
    }

    fn add_pid(&mut self, pid: Pid) -> Option<TrackerEffect> {
        let resolved = resolve_pid(pid)?;
        Some(self.insert(resolved.instance_key(), pid, resolved.uid))
    }

    fn insert(&mut self, key: InstanceKey, pid: Pid, uid: u32) -> TrackerEffect {
        if self.pid_index.get(&pid) == Some(&key) {
            return TrackerEffect::PidAdded { key, pid, uid };
        }
        self.pid_index.insert(pid, key.clone());
        let pids = self.instances.entry(key.clone()).or_default();
        if !pids.contains(&pid) {
            pids.push(pid);
        }
        TrackerEffect::PidAdded { key, pid, uid }
    }

    fn on_exit(&mut self, pid: Pid) -> TrackerEffect {
        let Some(key) = self.pid_index.remove(&pid) else {
            return TrackerEffect::Ignored;
        };
        let now_empty = match self.instances.get_mut(&key) {
            Some(pids) => {
                pids.retain(|&p| p != pid);
                pids.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.instances.remove(&key);
        }
        TrackerEffect::PidRemoved { key, pid, now_empty }
    }

    pub fn pids_for(&self, key: &InstanceKey) -> &[Pid] {
        self.instances.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn instance_for_pid(&self, pid: Pid) -> Option<&InstanceKey> {
        self.pid_index.get(&pid)
    }

    pub fn tracked_instances(&self) -> impl Iterator<Item = &InstanceKey> {
        self.instances.keys()
    }
}
