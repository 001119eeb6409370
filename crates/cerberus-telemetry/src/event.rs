//! Event taxonomy for the daemon's audit log.
//!
//! Grounded on the original daemon's `LogEventType` (`database_manager.h`):
//! the emoji-documented categories there collapse into plain snake_case
//! variants here, since this is a log record, not a UI label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of event recorded in the daemon's audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonEventType {
    GenericInfo,
    GenericWarning,
    GenericError,
    DaemonStart,
    DaemonShutdown,
    ScreenOn,
    ScreenOff,
    AppStart,
    AppStop,
    AppForeground,
    AppBackground,
    AppFrozen,
    AppUnfrozen,
    PowerUpdate,
    PowerWarning,
    DozeStateChange,
    DozeResourceReport,
    NetworkBlocked,
    NetworkUnblocked,
    ScheduledTaskExec,
    SafetyNetRejected,
    LogRetentionPruned,
}

impl DaemonEventType {
    /// Whether this event type always carries a package/user_id subject.
    pub fn is_app_scoped(&self) -> bool {
        matches!(
            self,
            DaemonEventType::AppStart
                | DaemonEventType::AppStop
                | DaemonEventType::AppForeground
                | DaemonEventType::AppBackground
                | DaemonEventType::AppFrozen
                | DaemonEventType::AppUnfrozen
                | DaemonEventType::NetworkBlocked
                | DaemonEventType::NetworkUnblocked
                | DaemonEventType::SafetyNetRejected
        )
    }
}

/// One audit-log record. Serialized as a single JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: DaemonEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl DaemonEvent {
    pub fn new(event_type: DaemonEventType, message: impl Into<String>) -> Self {
        DaemonEvent {
            timestamp: Utc::now(),
            event_type,
            package_name: None,
            user_id: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_instance(mut self, package_name: impl Into<String>, user_id: i32) -> Self {
        self.package_name = Some(package_name.into());
        self.user_id = Some(user_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_scoped_events_are_flagged() {
        assert!(DaemonEventType::AppFrozen.is_app_scoped());
        assert!(!DaemonEventType::DaemonStart.is_app_scoped());
    }

    #[test]
    fn event_serializes_without_optional_fields() {
        let event = DaemonEvent::new(DaemonEventType::DaemonStart, "cerberusd starting");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("package_name"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn event_with_instance_roundtrips() {
        let event = DaemonEvent::new(DaemonEventType::AppFrozen, "froze app")
            .with_instance("com.example.app", 0);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DaemonEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.package_name.as_deref(), Some("com.example.app"));
        assert_eq!(parsed.user_id, Some(0));
    }
}
