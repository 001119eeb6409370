//! The daemon's top-level tunables: tick cadence, doze thresholds, and
//! retention knobs. Everything here is serde-derived with `#[serde(default)]`
//! so a partial or missing config file degrades to sane defaults rather than
//! a hard failure — only semantic validation (see [`crate::validate`]) can
//! reject a loaded file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Schema version for `master.json`. Bumped whenever a field is removed or
/// its meaning changes; additive fields do not require a bump.
pub const MASTER_CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub schema_version: u32,

    /// How often the tick scheduler evaluates instance/doze state, in seconds.
    pub tick_interval_seconds: u64,

    /// Per-policy background timeouts, in seconds. `None` means the policy
    /// never triggers a freeze (used for `Exempted`).
    pub important_timeout_seconds: u64,
    pub standard_timeout_seconds: u64,
    pub strict_timeout_seconds: u64,

    /// Grace period in `AwaitingFreeze` before the action executor is
    /// actually invoked, letting a just-backgrounded app return to the
    /// foreground without paying a freeze/unfreeze round trip.
    pub awaiting_freeze_grace_seconds: u64,

    /// Consecutive idle seconds (no foreground activity device-wide) before
    /// transitioning from `Idle` to `DeepIdle`.
    pub deep_idle_threshold_seconds: u64,

    /// Battery percentage drop per hour that triggers a `BatteryDrainWarning`
    /// telemetry event.
    pub battery_drop_warning_pct_per_hour: f64,

    /// Event log retention.
    pub log_retention_days: u32,
    pub log_retention_max_bytes: u64,

    /// Admin/probe IPC socket name (abstract namespace on Linux).
    pub ipc_socket_name: String,
}

impl MasterConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn awaiting_freeze_grace(&self) -> Duration {
        Duration::from_secs(self.awaiting_freeze_grace_seconds)
    }

    pub fn deep_idle_threshold(&self) -> Duration {
        Duration::from_secs(self.deep_idle_threshold_seconds)
    }

    /// Background timeout for a given policy, matching
    /// `cerberus_common::policy::AppPolicy::background_timeout` but sourced
    /// from this config rather than hardcoded, so operators can retune
    /// without a rebuild.
    pub fn timeout_for(&self, policy: cerberus_common::policy::AppPolicy) -> Option<Duration> {
        use cerberus_common::policy::AppPolicy;
        match policy {
            AppPolicy::Exempted => None,
            AppPolicy::Important => Some(Duration::from_secs(self.important_timeout_seconds)),
            AppPolicy::Standard => Some(Duration::from_secs(self.standard_timeout_seconds)),
            AppPolicy::Strict => Some(Duration::from_secs(self.strict_timeout_seconds)),
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::validate::ValidationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::validate::ValidationError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse_json(&content)
    }

    pub fn parse_json(json: &str) -> Result<Self, crate::validate::ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| crate::validate::ValidationError::Parse(format!("invalid JSON: {}", e)))
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            schema_version: MASTER_CONFIG_SCHEMA_VERSION,
            tick_interval_seconds: 1,
            important_timeout_seconds: 180,
            standard_timeout_seconds: 30,
            strict_timeout_seconds: 10,
            awaiting_freeze_grace_seconds: 5,
            deep_idle_threshold_seconds: 3600,
            battery_drop_warning_pct_per_hour: 30.0,
            log_retention_days: 7,
            log_retention_max_bytes: 50 * 1024 * 1024,
            ipc_socket_name: "cerberusd".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerberus_common::policy::AppPolicy;

    #[test]
    fn defaults_match_spec_numbers() {
        let cfg = MasterConfig::default();
        assert_eq!(cfg.tick_interval_seconds, 1);
        assert_eq!(cfg.awaiting_freeze_grace_seconds, 5);
        assert_eq!(cfg.deep_idle_threshold_seconds, 3600);
    }

    #[test]
    fn timeout_for_matches_policy_ordinals() {
        let cfg = MasterConfig::default();
        assert_eq!(cfg.timeout_for(AppPolicy::Exempted), None);
        assert_eq!(cfg.timeout_for(AppPolicy::Important), Some(Duration::from_secs(180)));
        assert_eq!(cfg.timeout_for(AppPolicy::Strict), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parse_json_fills_missing_fields_with_defaults() {
        let cfg = MasterConfig::parse_json("{\"tick_interval_seconds\": 2}").unwrap();
        assert_eq!(cfg.tick_interval_seconds, 2);
        assert_eq!(cfg.standard_timeout_seconds, 30);
    }

    #[test]
    fn parse_json_rejects_malformed_input() {
        let result = MasterConfig::parse_json("{not json");
        assert!(result.is_err());
    }
}
