//! The per-app-instance lifecycle: the seven-state machine that decides
//! when an instance should be frozen, and the sole caller of the freeze
//! executor.
//!
//! Grounded on the original `StateManager`'s `AppRuntimeState`/
//! `transition_state`, unified per SPEC_FULL §4.3's seven-state machine
//! (the original's simpler `{STOPPED, RUNNING, FROZEN}` runtime enum is a
//! lossy projection of this one, not a second source of truth).

use std::time::{Duration, Instant};

use cerberus_common::{AppPolicy, InstanceKey, Pid};
use cerberus_config::{MasterConfig, SafetyNet};

use crate::action::{FreezeExecutor, FreezeOutcome};

/// Grace period an instance dwells in `AwaitingFreeze` before the freeze
/// executor is actually invoked, giving a just-dismissed notification a
/// chance to cancel it. Overridden at runtime by `MasterConfig`; this is
/// only the `Default`-config fallback used by tests.
pub const AWAITING_FREEZE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Stopped,
    Foreground,
    BackgroundActive,
    BackgroundIdle,
    AwaitingFreeze,
    Frozen,
    Exempted,
}

impl InstanceStatus {
    fn is_frozen(self) -> bool {
        matches!(self, InstanceStatus::Frozen)
    }
}

/// One recorded transition, kept for the admin dashboard's recent-activity
/// view and for tests asserting on transition reasons.
#[derive(Debug, Clone)]
pub struct TransitionLogEntry {
    pub from: InstanceStatus,
    pub to: InstanceStatus,
    pub reason: String,
    pub at: Instant,
}

/// Live state for one `(package_name, user_id)` app instance.
#[derive(Debug, Clone)]
pub struct AppInstanceRecord {
    pub key: InstanceKey,
    pub uid: Option<u32>,
    pub display_name: String,
    pub policy: AppPolicy,
    pub status: InstanceStatus,
    pub last_state_change: Instant,
    pub has_notification: bool,
    pub is_network_blocked: bool,
    history: Vec<TransitionLogEntry>,
}

impl AppInstanceRecord {
    fn new(key: InstanceKey, policy: AppPolicy, now: Instant) -> Self {
        let display_name = key.package_name.clone();
        AppInstanceRecord {
            key,
            uid: None,
            display_name,
            policy,
            status: InstanceStatus::Stopped,
            last_state_change: now,
            has_notification: false,
            is_network_blocked: false,
            history: Vec::new(),
        }
    }

    pub fn recent_history(&self) -> &[TransitionLogEntry] {
        &self.history
    }

    fn transition(&mut self, to: InstanceStatus, reason: impl Into<String>, now: Instant) {
        if self.status == to {
            return;
        }
        let reason = reason.into();
        tracing::info!(instance = %self.key, from = ?self.status, to = ?to, reason = %reason, "instance transition");
        self.history.push(TransitionLogEntry { from: self.status, to, reason, at: now });
        if self.history.len() > 50 {
            self.history.remove(0);
        }
        self.status = to;
        self.last_state_change = now;
    }
}

/// Owns every tracked instance and is the sole caller of the freeze
/// executor. The process tracker feeds it pid-set changes; the tick
/// scheduler feeds it timeouts, foreground identity, and doze batch
/// commands.
pub struct InstanceManager {
    records: std::collections::HashMap<InstanceKey, AppInstanceRecord>,
    safety_net: SafetyNet,
}

impl InstanceManager {
    pub fn new(safety_net: SafetyNet) -> Self {
        InstanceManager { records: std::collections::HashMap::new(), safety_net }
    }

    fn effective_policy(&self, key: &InstanceKey, stored: AppPolicy) -> AppPolicy {
        self.safety_net.effective_policy(&key.package_name, stored)
    }

    pub fn get(&self, key: &InstanceKey) -> Option<&AppInstanceRecord> {
        self.records.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppInstanceRecord> {
        self.records.values()
    }

    /// Invariant 1: `pids` empty ⇔ `status = Stopped` (or `Exempted`). Called
    /// by the process tracker whenever a pid is newly associated with `key`.
    pub fn on_pid_added(&mut self, key: &InstanceKey, uid: u32, stored_policy: AppPolicy, now: Instant) {
        let policy = self.effective_policy(key, stored_policy);
        let record = self.records.entry(key.clone()).or_insert_with(|| AppInstanceRecord::new(key.clone(), policy, now));
        record.uid.get_or_insert(uid);
        record.policy = policy;

        if record.status == InstanceStatus::Stopped {
            let target = if policy == AppPolicy::Exempted { InstanceStatus::Exempted } else { InstanceStatus::BackgroundIdle };
            record.transition(target, "pid added", now);
        }
    }

    /// Called when an instance's pid set becomes empty.
    pub fn on_pids_emptied(&mut self, key: &InstanceKey, now: Instant, executor: &FreezeExecutor) {
        if let Some(record) = self.records.get_mut(key) {
            if record.status.is_frozen() {
                let _ = executor.unfreeze(key, &[]);
            }
            record.transition(InstanceStatus::Stopped, "all pids exited", now);
        }
    }

    /// Refreshes foreground identity: `fg` is the instance owning the first
    /// pid in `/dev/cpuset/foreground/tasks`, if resolvable.
    pub fn set_foreground(&mut self, fg: Option<&InstanceKey>, pids_of: impl Fn(&InstanceKey) -> Vec<Pid>, now: Instant, executor: &FreezeExecutor) {
        let fg = fg.cloned();
        for (key, record) in self.records.iter_mut() {
            let is_fg = fg.as_ref() == Some(key);
            match (is_fg, record.status) {
                (true, InstanceStatus::Frozen) => {
                    let pids = pids_of(key);
                    let _ = executor.unfreeze(key, &pids);
                    record.transition(InstanceStatus::Foreground, "app became foreground (unfroze)", now);
                }
                (true, s) if s != InstanceStatus::Foreground && s != InstanceStatus::Exempted => {
                    record.transition(InstanceStatus::Foreground, "app became foreground", now);
                }
                (false, InstanceStatus::Foreground) => {
                    record.transition(InstanceStatus::BackgroundIdle, "app left foreground", now);
                }
                _ => {}
            }
        }
    }

    /// Evaluates timeout-driven transitions for every instance:
    /// `BackgroundIdle → AwaitingFreeze → Frozen`. Timeouts are sourced from
    /// `config` rather than `AppPolicy::background_timeout` so operators can
    /// retune without a rebuild (§4.5).
    pub fn evaluate_timeouts(
        &mut self,
        now: Instant,
        config: &MasterConfig,
        pids_of: impl Fn(&InstanceKey) -> Vec<Pid>,
        executor: &FreezeExecutor,
    ) {
        for (key, record) in self.records.iter_mut() {
            match record.status {
                InstanceStatus::BackgroundIdle => {
                    if let Some(timeout) = config.timeout_for(record.policy) {
                        if now.duration_since(record.last_state_change) >= timeout {
                            record.transition(InstanceStatus::AwaitingFreeze, "background timeout elapsed", now);
                        }
                    }
                }
                InstanceStatus::BackgroundActive => {
                    // Notification-driven wake is transient: once the same
                    // per-policy quiet period elapses with no further
                    // activity, fall back into the normal idle/freeze
                    // pipeline rather than dwelling here indefinitely.
                    if let Some(timeout) = config.timeout_for(record.policy) {
                        if now.duration_since(record.last_state_change) >= timeout {
                            record.transition(InstanceStatus::BackgroundIdle, "notification quiet period elapsed", now);
                        }
                    }
                }
                InstanceStatus::AwaitingFreeze => {
                    if now.duration_since(record.last_state_change) >= config.awaiting_freeze_grace() {
                        let pids = pids_of(key);
                        match executor.freeze(key, &pids) {
                            FreezeOutcome::Ok => record.transition(InstanceStatus::Frozen, "freeze grace elapsed", now),
                            FreezeOutcome::Retry => {
                                tracing::debug!(instance = %key, "freeze retryable, remaining in AwaitingFreeze");
                            }
                            FreezeOutcome::Fatal(err) => {
                                tracing::error!(instance = %key, error = %err, "freeze failed fatally, exempting instance");
                                record.transition(InstanceStatus::Exempted, format!("freeze failed: {err}"), now);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// A notification arrived for `key`: wake a frozen instance.
    pub fn on_notification(&mut self, key: &InstanceKey, now: Instant, pids: &[Pid], executor: &FreezeExecutor) {
        if let Some(record) = self.records.get_mut(key) {
            record.has_notification = true;
            if record.status.is_frozen() {
                let _ = executor.unfreeze(key, pids);
                record.transition(InstanceStatus::BackgroundActive, "notification arrived", now);
            }
        }
    }

    /// Drives every non-exempt instance to `Frozen` as a batch, on deep-idle
    /// entry.
    pub fn freeze_all_non_exempt(&mut self, now: Instant, pids_of: impl Fn(&InstanceKey) -> Vec<Pid>, executor: &FreezeExecutor) {
        for (key, record) in self.records.iter_mut() {
            if record.status == InstanceStatus::Exempted || record.status == InstanceStatus::Stopped || record.status.is_frozen() {
                continue;
            }
            let pids = pids_of(key);
            match executor.freeze(key, &pids) {
                FreezeOutcome::Ok => record.transition(InstanceStatus::Frozen, "deep-idle batch freeze", now),
                FreezeOutcome::Retry => {}
                FreezeOutcome::Fatal(err) => {
                    record.transition(InstanceStatus::Exempted, format!("deep-idle freeze failed: {err}"), now);
                }
            }
        }
    }

    /// Releases every frozen instance back to `BackgroundIdle` on deep-idle
    /// exit.
    pub fn release_all_frozen(&mut self, now: Instant, pids_of: impl Fn(&InstanceKey) -> Vec<Pid>, executor: &FreezeExecutor) {
        for (key, record) in self.records.iter_mut() {
            if record.status.is_frozen() {
                let pids = pids_of(key);
                let _ = executor.unfreeze(key, &pids);
                record.transition(InstanceStatus::BackgroundIdle, "deep-idle batch release", now);
            }
        }
    }

    /// Applies a policy change from the admin interface to every in-memory
    /// instance of `package_name`, rejecting the change outright if the
    /// package is safety-net protected.
    pub fn set_policy(&mut self, package_name: &str, new_policy: AppPolicy, now: Instant) -> Result<(), String> {
        if self.safety_net.is_protected(package_name) {
            return Err(format!("{package_name} is safety-net protected and cannot change policy"));
        }
        for (key, record) in self.records.iter_mut() {
            if key.package_name == package_name {
                record.policy = new_policy;
                if new_policy == AppPolicy::Exempted {
                    record.transition(InstanceStatus::Exempted, "policy set to Exempted", now);
                } else if record.status == InstanceStatus::Exempted {
                    record.transition(InstanceStatus::BackgroundIdle, "policy left Exempted", now);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerberus_common::UserId;

    fn manager() -> InstanceManager {
        InstanceManager::new(SafetyNet::default())
    }

    fn key(pkg: &str) -> InstanceKey {
        InstanceKey::new(pkg, UserId(0))
    }

    #[test]
    fn pid_added_to_stopped_instance_enters_background_idle() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.example.app"), 10123, AppPolicy::Standard, now);
        assert_eq!(mgr.get(&key("com.example.app")).unwrap().status, InstanceStatus::BackgroundIdle);
    }

    #[test]
    fn safety_net_package_is_exempted_on_first_pid() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.android.systemui"), 1000, AppPolicy::Standard, now);
        assert_eq!(mgr.get(&key("com.android.systemui")).unwrap().status, InstanceStatus::Exempted);
    }

    #[test]
    fn set_policy_rejects_safety_net_package() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.android.systemui"), 1000, AppPolicy::Standard, now);
        let result = mgr.set_policy("com.android.systemui", AppPolicy::Strict, now);
        assert!(result.is_err());
    }

    #[test]
    fn set_policy_to_exempted_transitions_instance() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.example.app"), 10123, AppPolicy::Standard, now);
        mgr.set_policy("com.example.app", AppPolicy::Exempted, now).unwrap();
        assert_eq!(mgr.get(&key("com.example.app")).unwrap().status, InstanceStatus::Exempted);
    }

    #[test]
    fn transition_history_records_reason() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.example.app"), 10123, AppPolicy::Standard, now);
        let record = mgr.get(&key("com.example.app")).unwrap();
        assert_eq!(record.recent_history().len(), 1);
        assert_eq!(record.recent_history()[0].reason, "pid added");
    }

    #[test]
    fn background_active_times_out_to_background_idle() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FreezeExecutor::new(dir.path().join("lock"));
        let config = MasterConfig::default();
        let mut mgr = manager();
        let k = key("com.example.app");
        let now = Instant::now();

        mgr.on_pid_added(&k, 10123, AppPolicy::Standard, now);
        let past_idle = now + Duration::from_secs(config.standard_timeout_seconds + 1);
        mgr.evaluate_timeouts(past_idle, &config, |_| Vec::new(), &executor);
        assert_eq!(mgr.get(&k).unwrap().status, InstanceStatus::AwaitingFreeze);

        let past_grace = past_idle + config.awaiting_freeze_grace() + Duration::from_secs(1);
        mgr.evaluate_timeouts(past_grace, &config, |_| Vec::new(), &executor);
        assert_eq!(mgr.get(&k).unwrap().status, InstanceStatus::Frozen);

        mgr.on_notification(&k, past_grace, &[], &executor);
        assert_eq!(mgr.get(&k).unwrap().status, InstanceStatus::BackgroundActive);

        let past_quiet = past_grace + Duration::from_secs(config.standard_timeout_seconds + 1);
        mgr.evaluate_timeouts(past_quiet, &config, |_| Vec::new(), &executor);
        assert_eq!(mgr.get(&k).unwrap().status, InstanceStatus::BackgroundIdle);
    }

    #[test]
    fn repeated_transition_to_same_status_is_noop() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.on_pid_added(&key("com.example.app"), 10123, AppPolicy::Standard, now);
        mgr.on_pid_added(&key("com.example.app"), 10123, AppPolicy::Standard, now);
        let record = mgr.get(&key("com.example.app")).unwrap();
        assert_eq!(record.recent_history().len(), 1);
    }
}
