//! The device-wide doze state machine: `Active → Idle → DeepIdle`.
//!
//! Grounded on the original `StateManager::update_doze_state` and its
//! `doze_cpu_snapshot_`/CPU-jiffies delta reporting (`state_manager.cpp`
//! lines ~660-715); `cpu_jiffies_for_pid` reads the same `/proc/<pid>/stat`
//! `utime`+`stime` fields as the original's `SystemMonitor::get_app_stats`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cerberus_common::{InstanceKey, Pid};

use crate::action::{network, FreezeExecutor};
use crate::instance::InstanceManager;

pub const IDLE_AFTER: Duration = Duration::from_secs(60);
pub const DEEP_IDLE_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DozeState {
    Active,
    Idle,
    DeepIdle,
}

/// Per-instance CPU-jiffies usage over one deep-idle interval, in seconds.
#[derive(Debug, Clone)]
pub struct CpuUsageReport {
    pub instance: InstanceKey,
    pub cpu_seconds: f64,
}

/// Reads `utime + stime` (jiffies) from `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
pub fn cpu_jiffies_for_pid(pid: u32) -> Option<i64> {
    let content = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let comm_end = content.rfind(')')?;
    let rest = content.get(comm_end + 2..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: i64 = fields.get(11)?.parse().ok()?;
    let stime: i64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(not(target_os = "linux"))]
pub fn cpu_jiffies_for_pid(_pid: u32) -> Option<i64> {
    None
}

fn clock_tick_hz() -> i64 {
    #[cfg(unix)]
    {
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz > 0 {
            return hz;
        }
    }
    100
}

/// Drives `Active`/`Idle`/`DeepIdle` transitions from screen/charging
/// signals and elapsed time, and coordinates the doze-entry/exit side
/// effects (network blocking, batch freeze/release, CPU accounting) against
/// an [`InstanceManager`].
pub struct DozeController {
    state: DozeState,
    since: Instant,
    cpu_snapshot: HashMap<Pid, i64>,
    blocked_uids: Vec<u32>,
}

impl DozeController {
    pub fn new(now: Instant) -> Self {
        DozeController { state: DozeState::Active, since: now, cpu_snapshot: HashMap::new(), blocked_uids: Vec::new() }
    }

    pub fn state(&self) -> DozeState {
        self.state
    }

    /// Forces `Active` immediately; screen-on or charging always wins over
    /// the timer and over any external hint. Returns the CPU-usage report
    /// when this call exits `DeepIdle`.
    pub fn force_active(
        &mut self,
        now: Instant,
        instances: &mut InstanceManager,
        pids_of: impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) -> Option<Vec<CpuUsageReport>> {
        if self.state == DozeState::Active {
            return None;
        }
        let report = self.exit_deep_idle_if_needed(now, instances, &pids_of, executor);
        self.transition(DozeState::Active, now);
        if report.is_empty() {
            None
        } else {
            Some(report)
        }
    }

    /// Evaluated once per tick while the screen is off and the device is not
    /// charging. Screen-on/charging is signalled separately via
    /// [`Self::force_active`].
    pub fn evaluate(
        &mut self,
        now: Instant,
        instances: &mut InstanceManager,
        pids_of: impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) -> Option<Vec<CpuUsageReport>> {
        match self.state {
            DozeState::Active => {
                if now.duration_since(self.since) >= IDLE_AFTER {
                    self.transition(DozeState::Idle, now);
                }
                None
            }
            DozeState::Idle => {
                if now.duration_since(self.since) >= DEEP_IDLE_AFTER {
                    self.enter_deep_idle(now, instances, &pids_of, executor);
                }
                None
            }
            DozeState::DeepIdle => None,
        }
    }

    /// Pre-empts the timer with an externally delivered doze hint, moving
    /// the state machine forward (never backward past the `Active` guard
    /// enforced by [`Self::force_active`]).
    pub fn apply_external_hint(
        &mut self,
        hint: DozeState,
        now: Instant,
        instances: &mut InstanceManager,
        pids_of: impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) {
        match (self.state, hint) {
            (DozeState::Active, DozeState::Idle) | (DozeState::Active, DozeState::DeepIdle) => {
                self.transition(DozeState::Idle, now);
                if hint == DozeState::DeepIdle {
                    self.enter_deep_idle(now, instances, &pids_of, executor);
                }
            }
            (DozeState::Idle, DozeState::DeepIdle) => self.enter_deep_idle(now, instances, &pids_of, executor),
            _ => {}
        }
    }

    fn enter_deep_idle(
        &mut self,
        now: Instant,
        instances: &mut InstanceManager,
        pids_of: &impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) {
        self.cpu_snapshot.clear();
        self.blocked_uids.clear();
        for record in instances.iter() {
            if record.status == crate::instance::InstanceStatus::Exempted {
                continue;
            }
            for pid in pids_of(&record.key) {
                if let Some(jiffies) = cpu_jiffies_for_pid(pid.0) {
                    self.cpu_snapshot.insert(pid, jiffies);
                }
            }
            if let Some(uid) = record.uid {
                if network::block_uid(uid) {
                    self.blocked_uids.push(uid);
                }
            }
        }
        instances.freeze_all_non_exempt(now, pids_of, executor);
        self.transition(DozeState::DeepIdle, now);
    }

    fn exit_deep_idle_if_needed(
        &mut self,
        now: Instant,
        instances: &mut InstanceManager,
        pids_of: &impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) -> Vec<CpuUsageReport> {
        if self.state != DozeState::DeepIdle {
            return Vec::new();
        }
        let hz = clock_tick_hz() as f64;
        let mut report = Vec::new();
        for record in instances.iter() {
            let mut delta = 0i64;
            for pid in pids_of(&record.key) {
                if let (Some(&before), Some(after)) = (self.cpu_snapshot.get(&pid), cpu_jiffies_for_pid(pid.0)) {
                    if after > before {
                        delta += after - before;
                    }
                }
            }
            if delta > 0 {
                report.push(CpuUsageReport { instance: record.key.clone(), cpu_seconds: delta as f64 / hz });
            }
        }

        for uid in self.blocked_uids.drain(..) {
            network::unblock_uid(uid);
        }
        instances.release_all_frozen(now, pids_of, executor);
        report
    }

    fn transition(&mut self, to: DozeState, now: Instant) {
        if self.state == to {
            return;
        }
        tracing::info!(from = ?self.state, to = ?to, "doze state transition");
        self.state = to;
        self.since = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerberus_common::UserId;
    use tempfile::tempdir;

    fn executor() -> FreezeExecutor {
        let dir = tempdir().unwrap();
        FreezeExecutor::new(dir.path().join("lock"))
    }

    #[test]
    fn starts_active() {
        let ctl = DozeController::new(Instant::now());
        assert_eq!(ctl.state(), DozeState::Active);
    }

    #[test]
    fn force_active_is_noop_when_already_active() {
        let mut ctl = DozeController::new(Instant::now());
        let mut mgr = InstanceManager::new(cerberus_config::SafetyNet::default());
        let exec = executor();
        ctl.force_active(Instant::now(), &mut mgr, |_| Vec::new(), &exec);
        assert_eq!(ctl.state(), DozeState::Active);
    }

    #[test]
    fn external_hint_advances_but_never_skips_active_guard() {
        let mut ctl = DozeController::new(Instant::now());
        let mut mgr = InstanceManager::new(cerberus_config::SafetyNet::default());
        let exec = executor();
        let now = Instant::now();
        ctl.apply_external_hint(DozeState::DeepIdle, now, &mut mgr, |_| Vec::new(), &exec);
        assert_eq!(ctl.state(), DozeState::DeepIdle);
        ctl.force_active(now, &mut mgr, |_| Vec::new(), &exec);
        assert_eq!(ctl.state(), DozeState::Active);
    }

    #[test]
    fn exit_deep_idle_without_entry_reports_nothing() {
        let mut ctl = DozeController::new(Instant::now());
        let mut mgr = InstanceManager::new(cerberus_config::SafetyNet::default());
        let exec = executor();
        let report = ctl.exit_deep_idle_if_needed(Instant::now(), &mut mgr, &|_| Vec::new(), &exec);
        assert!(report.is_empty());
    }

    #[test]
    fn deep_idle_entry_transition_is_logged() {
        let mut ctl = DozeController::new(Instant::now());
        let mut mgr = InstanceManager::new(cerberus_config::SafetyNet::default());
        let exec = executor();
        let key = InstanceKey::new("com.example.app", UserId(0));
        mgr.on_pid_added(&key, 10123, cerberus_common::AppPolicy::Standard, Instant::now());
        let now = Instant::now();
        ctl.enter_deep_idle(now, &mut mgr, &|_| Vec::new(), &exec);
        assert_eq!(ctl.state(), DozeState::DeepIdle);
    }
}
