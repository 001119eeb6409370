//! Configuration validation errors and semantic validation of [`MasterConfig`].
//!
//! [`MasterConfig`]: crate::master::MasterConfig

use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

impl ValidationError {
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::Io(_) => 60,
            ValidationError::Parse(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

/// Semantic validation beyond what serde's `#[serde(default)]` already
/// guarantees: ordering between related timeouts and non-negative/in-range
/// numeric fields. Called from `cerberusd check-config`.
pub fn validate_master_config(config: &crate::master::MasterConfig) -> ValidationResult<()> {
    use crate::master::MASTER_CONFIG_SCHEMA_VERSION;

    if config.schema_version != MASTER_CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: MASTER_CONFIG_SCHEMA_VERSION,
            actual: config.schema_version,
        });
    }

    if config.tick_interval_seconds == 0 {
        return Err(ValidationError::InvalidValue {
            field: "tick_interval_seconds".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    // Strict must be the shortest leash, Standard next, Important longest.
    if !(config.strict_timeout_seconds <= config.standard_timeout_seconds
        && config.standard_timeout_seconds <= config.important_timeout_seconds)
    {
        return Err(ValidationError::InvalidValue {
            field: "important_timeout_seconds/standard_timeout_seconds/strict_timeout_seconds".to_string(),
            message: "must satisfy strict <= standard <= important".to_string(),
        });
    }

    if config.deep_idle_threshold_seconds == 0 {
        return Err(ValidationError::InvalidValue {
            field: "deep_idle_threshold_seconds".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if !(0.0..=100.0).contains(&config.battery_drop_warning_pct_per_hour) {
        return Err(ValidationError::InvalidValue {
            field: "battery_drop_warning_pct_per_hour".to_string(),
            message: format!("must be in [0, 100], got {}", config.battery_drop_warning_pct_per_hour),
        });
    }

    if config.ipc_socket_name.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "ipc_socket_name".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_master_config(&MasterConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let mut cfg = MasterConfig::default();
        cfg.tick_interval_seconds = 0;
        assert!(validate_master_config(&cfg).is_err());
    }

    #[test]
    fn rejects_out_of_order_timeouts() {
        let mut cfg = MasterConfig::default();
        cfg.strict_timeout_seconds = 999;
        let err = validate_master_config(&cfg).unwrap_err();
        assert_eq!(err.code(), 65);
    }

    #[test]
    fn rejects_schema_version_mismatch() {
        let mut cfg = MasterConfig::default();
        cfg.schema_version = 99;
        assert!(matches!(
            validate_master_config(&cfg),
            Err(ValidationError::VersionMismatch { .. })
        ));
    }
}
