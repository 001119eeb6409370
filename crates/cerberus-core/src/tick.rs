//! The 1 Hz scheduler: the daemon's single worker loop, driving process
//! tracking, instance timeouts, the doze controller, and periodic battery
//! sampling under one lock.
//!
//! Grounded on the original `StateManager::tick()`'s ordering (foreground
//! detection, then `tick_app_states()`, then `tick_doze_state()`, then
//! `tick_power_state()`) and on the teacher's injectable-callback pattern
//! for testing a scheduler without a real sleep loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cerberus_common::{InstanceKey, Pid};
use cerberus_config::MasterConfig;

use crate::action::FreezeExecutor;
use crate::doze::{CpuUsageReport, DozeController};
use crate::instance::InstanceManager;
use crate::power::{BatteryMonitor, CapacitySample};
use crate::process::ProcessTracker;

/// External signals the IPC layer feeds into the scheduler between ticks.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentSignals {
    pub screen_on: bool,
    pub charging: bool,
}

/// Everything one tick can report back to the caller (for logging/telemetry
/// dispatch, which lives above this module).
#[derive(Debug, Default)]
pub struct TickReport {
    pub cpu_usage: Option<Vec<CpuUsageReport>>,
    pub battery_sample: Option<CapacitySample>,
}

/// Owns every piece of mutable daemon state behind one lock, matching the
/// original's single `state_mutex_` covering app + doze state together.
struct TickState {
    tracker: ProcessTracker,
    instances: InstanceManager,
    doze: DozeController,
    battery: BatteryMonitor,
    last_battery_sample: Instant,
    signals: EnvironmentSignals,
}

pub struct TickScheduler {
    state: Mutex<TickState>,
    executor: FreezeExecutor,
    config: MasterConfig,
    foreground: Box<dyn Fn() -> Option<InstanceKey> + Send + Sync>,
    shutdown: AtomicBool,
}

const BATTERY_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

impl TickScheduler {
    pub fn new(
        config: MasterConfig,
        executor: FreezeExecutor,
        safety_net: cerberus_config::SafetyNet,
        foreground: impl Fn() -> Option<InstanceKey> + Send + Sync + 'static,
        now: Instant,
    ) -> Self {
        let warning_rate = config.battery_drop_warning_pct_per_hour;
        TickScheduler {
            state: Mutex::new(TickState {
                tracker: ProcessTracker::new(),
                instances: InstanceManager::new(safety_net),
                doze: DozeController::new(now),
                battery: BatteryMonitor::new(warning_rate),
                last_battery_sample: now,
                signals: EnvironmentSignals::default(),
            }),
            executor,
            config,
            foreground: Box::new(foreground),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn update_signals(&self, signals: EnvironmentSignals) {
        self.state.lock().unwrap().signals = signals;
    }

    /// Applies a policy change to every in-memory instance of `package_name`,
    /// rejecting safety-net packages. The admin IPC layer must only persist
    /// the new policy to the store once this returns `Ok`.
    pub fn set_policy(&self, package_name: &str, new_policy: cerberus_common::AppPolicy, now: Instant) -> Result<(), String> {
        self.state.lock().unwrap().instances.set_policy(package_name, new_policy, now)
    }

    /// Runs `initial_scan` over `/proc`, seeding instance state before the
    /// first tick so already-running apps aren't invisible to the daemon.
    pub fn bootstrap(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let effects = state.tracker.initial_scan();
        Self::apply_tracker_effects(&mut state, effects, now);
    }

    /// One full tick: refresh foreground identity, evaluate instance
    /// timeouts, evaluate doze, and (at most once per minute) sample the
    /// battery. Held entirely under the single lock, per §4.6: the action
    /// executor is itself safe against concurrent calls on disjoint pids.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut state = self.state.lock().unwrap();
        let mut report = TickReport::default();

        // One disjoint-field destructure up front: `tracker`, `instances`,
        // `doze` and `battery` are then independently (re)borrowable without
        // re-deref'ing the mutex guard, which would otherwise re-take a
        // whole-guard borrow each time and collide with the previous one.
        let TickState { tracker, instances, doze, battery, last_battery_sample, signals } = &mut *state;

        let fg = (self.foreground)();
        instances.set_foreground(fg.as_ref(), |key: &InstanceKey| tracker.pids_for(key).to_vec(), now, &self.executor);

        instances.evaluate_timeouts(now, &self.config, |key: &InstanceKey| tracker.pids_for(key).to_vec(), &self.executor);

        let doze_report = if signals.screen_on || signals.charging {
            doze.force_active(now, instances, |key: &InstanceKey| tracker.pids_for(key).to_vec(), &self.executor)
        } else {
            doze.evaluate(now, instances, |key: &InstanceKey| tracker.pids_for(key).to_vec(), &self.executor)
        };
        if let Some(cpu_usage) = doze_report {
            report.cpu_usage = Some(cpu_usage);
        }

        if now.duration_since(*last_battery_sample) >= BATTERY_SAMPLE_INTERVAL {
            let elapsed = now.duration_since(*last_battery_sample).as_secs();
            *last_battery_sample = now;
            if let Some(stats) = crate::power::read_battery_stats() {
                report.battery_sample = Some(battery.sample(stats, elapsed));
            }
        }

        report
    }

    /// Feeds one process-lifecycle event (fork/exec/exit) into the tracker
    /// and reflects the effect into instance state, outside the 1 Hz cadence
    /// since these arrive asynchronously from a netlink/ptrace source.
    pub fn on_process_event(&self, event: crate::process::ProcEvent, policy_of: impl Fn(&str) -> cerberus_common::AppPolicy, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let effect = state.tracker.on_event(event);
        self.apply_single_effect(&mut state, effect, policy_of, now);
    }

    fn apply_tracker_effects(state: &mut TickState, effects: Vec<crate::process::TrackerEffect>, now: Instant) {
        for effect in effects {
            Self::apply_single_effect_no_freeze(state, effect, |_| cerberus_common::AppPolicy::Standard, now);
        }
    }

    /// Bootstrap variant: `initial_scan` only ever produces `PidAdded`, so
    /// there is no unfreeze to perform and no executor is needed.
    fn apply_single_effect_no_freeze(
        state: &mut TickState,
        effect: crate::process::TrackerEffect,
        policy_of: impl Fn(&str) -> cerberus_common::AppPolicy,
        now: Instant,
    ) {
        if let crate::process::TrackerEffect::PidAdded { key, uid, .. } = effect {
            let policy = policy_of(&key.package_name);
            state.instances.on_pid_added(&key, uid, policy, now);
        }
    }

    fn apply_single_effect(
        &self,
        state: &mut TickState,
        effect: crate::process::TrackerEffect,
        policy_of: impl Fn(&str) -> cerberus_common::AppPolicy,
        now: Instant,
    ) {
        use crate::process::TrackerEffect;
        match effect {
            TrackerEffect::PidAdded { key, uid, .. } => {
                let policy = policy_of(&key.package_name);
                state.instances.on_pid_added(&key, uid, policy, now);
            }
            TrackerEffect::PidRemoved { key, now_empty, .. } => {
                if now_empty {
                    state.instances.on_pids_emptied(&key, now, &self.executor);
                }
            }
            TrackerEffect::Ignored => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerberus_config::SafetyNet;
    use tempfile::tempdir;

    fn scheduler() -> TickScheduler {
        let dir = tempdir().unwrap();
        let executor = FreezeExecutor::new(dir.path().join("lock"));
        TickScheduler::new(MasterConfig::default(), executor, SafetyNet::default(), || None, Instant::now())
    }

    #[test]
    fn tick_does_not_panic_with_no_instances() {
        let scheduler = scheduler();
        let report = scheduler.tick(Instant::now());
        assert!(report.cpu_usage.is_none());
    }

    #[test]
    fn shutdown_flag_round_trips() {
        let scheduler = scheduler();
        assert!(!scheduler.should_shutdown());
        scheduler.request_shutdown();
        assert!(scheduler.should_shutdown());
    }

    #[test]
    fn screen_on_signal_keeps_doze_active() {
        let scheduler = scheduler();
        scheduler.update_signals(EnvironmentSignals { screen_on: true, charging: false });
        let report = scheduler.tick(Instant::now());
        assert!(report.cpu_usage.is_none());
    }

    #[test]
    fn set_policy_rejects_safety_net_package() {
        let dir = tempdir().unwrap();
        let executor = FreezeExecutor::new(dir.path().join("lock"));
        let scheduler = TickScheduler::new(MasterConfig::default(), executor, SafetyNet::default(), || None, Instant::now());
        let result = scheduler.set_policy("android", cerberus_common::AppPolicy::Strict, Instant::now());
        assert!(result.is_err());
    }

    #[test]
    fn process_event_tracks_new_pid() {
        let scheduler = scheduler();
        scheduler.on_process_event(
            crate::process::ProcEvent::Exec { pid: Pid(std::process::id()) },
            |_| cerberus_common::AppPolicy::Standard,
            Instant::now(),
        );
    }
}
