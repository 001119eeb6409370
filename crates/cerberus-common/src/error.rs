//! Unified error taxonomy shared across all cerberus crates.
//!
//! Every fallible operation in the daemon returns an [`Error`] so that both
//! the CLI's human-readable output and the admin IPC's `resp.error` payload
//! can be driven from a single source of truth: a stable numeric code, a
//! category, and whether the condition is recoverable.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad grouping of error causes, used for both logging and IPC payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Tracking,
    Action,
    Doze,
    Ipc,
    Io,
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Tracking => write!(f, "tracking"),
            ErrorCategory::Action => write!(f, "action"),
            ErrorCategory::Doze => write!(f, "doze"),
            ErrorCategory::Ipc => write!(f, "ipc"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// What the caller should do in response to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Nothing to do; already handled (e.g. fell back to defaults).
    None,
    /// Retry the operation; the condition is expected to be transient.
    Retry,
    /// Fix configuration or environment, then restart.
    FixConfiguration,
    /// Run as root / grant the required capability.
    ElevatePrivilege,
    /// Report as a bug.
    ReportBug,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::None => write!(f, "none"),
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::FixConfiguration => write!(f, "fix_configuration"),
            SuggestedAction::ElevatePrivilege => write!(f, "elevate_privilege"),
            SuggestedAction::ReportBug => write!(f, "report_bug"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // Config (10-19)
    #[error("config file not found at {path}")]
    ConfigNotFound { path: PathBuf },
    #[error("config file at {path} is malformed: {reason}")]
    ConfigMalformed { path: PathBuf, reason: String },
    #[error("config validation failed: {reason}")]
    ConfigInvalid { reason: String },

    // Tracking (20-29)
    #[error("failed to read /proc/{pid}: {reason}")]
    ProcRead { pid: u32, reason: String },
    #[error("unknown pid {pid} referenced by event")]
    UnknownPid { pid: u32 },

    // Action (30-39)
    #[error("binder coordination failed for pid {pid}: {reason}")]
    BinderFailed { pid: u32, reason: String },
    #[error("cgroup freeze failed for instance {instance}: {reason}")]
    CgroupFailed { instance: String, reason: String },
    #[error("signal delivery failed for pid {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },
    #[error("action retryable for pid {pid}")]
    ActionRetry { pid: u32 },
    #[error("permission denied performing {operation}")]
    PermissionDenied { operation: String },

    // Doze (40-49)
    #[error("doze transition rejected: {reason}")]
    DozeRejected { reason: String },

    // Ipc (50-59)
    #[error("malformed ipc frame: {reason}")]
    IpcMalformed { reason: String },
    #[error("unknown ipc message type {message_type}")]
    IpcUnknownType { message_type: String },
    #[error("ipc command rejected: {reason}")]
    IpcRejected { reason: String },

    // Io (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform (70-79)
    #[error("required kernel feature unavailable: {feature}")]
    CapabilityMissing { feature: String },
}

impl Error {
    /// Stable numeric code. Changes to these values require a major version
    /// bump; automation may match on them.
    pub fn code(&self) -> u32 {
        match self {
            Error::ConfigNotFound { .. } => 10,
            Error::ConfigMalformed { .. } => 11,
            Error::ConfigInvalid { .. } => 12,
            Error::ProcRead { .. } => 20,
            Error::UnknownPid { .. } => 21,
            Error::BinderFailed { .. } => 30,
            Error::CgroupFailed { .. } => 31,
            Error::SignalFailed { .. } => 32,
            Error::ActionRetry { .. } => 33,
            Error::PermissionDenied { .. } => 34,
            Error::DozeRejected { .. } => 40,
            Error::IpcMalformed { .. } => 50,
            Error::IpcUnknownType { .. } => 51,
            Error::IpcRejected { .. } => 52,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::CapabilityMissing { .. } => 70,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code() / 10 {
            1 => ErrorCategory::Config,
            2 => ErrorCategory::Tracking,
            3 => ErrorCategory::Action,
            4 => ErrorCategory::Doze,
            5 => ErrorCategory::Ipc,
            6 => ErrorCategory::Io,
            _ => ErrorCategory::Platform,
        }
    }

    /// Whether the caller can reasonably expect a later retry to succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ActionRetry { .. }
                | Error::ConfigNotFound { .. }
                | Error::ConfigMalformed { .. }
                | Error::UnknownPid { .. }
        )
    }

    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::ActionRetry { .. } => SuggestedAction::Retry,
            Error::ConfigNotFound { .. } | Error::ConfigMalformed { .. } => SuggestedAction::None,
            Error::ConfigInvalid { .. } => SuggestedAction::FixConfiguration,
            Error::PermissionDenied { .. } => SuggestedAction::ElevatePrivilege,
            Error::CapabilityMissing { .. } => SuggestedAction::None,
            Error::UnknownPid { .. } => SuggestedAction::None,
            Error::IpcMalformed { .. } | Error::IpcUnknownType { .. } | Error::IpcRejected { .. } => {
                SuggestedAction::FixConfiguration
            }
            Error::BinderFailed { .. } | Error::CgroupFailed { .. } | Error::SignalFailed { .. } => {
                SuggestedAction::ReportBug
            }
            Error::DozeRejected { .. } => SuggestedAction::None,
            Error::Io(_) | Error::Json(_) => SuggestedAction::ReportBug,
        }
    }

    /// Short headline for human-readable CLI output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::ConfigNotFound { .. } => "Config Not Found",
            Error::ConfigMalformed { .. } => "Config Malformed",
            Error::ConfigInvalid { .. } => "Config Invalid",
            Error::ProcRead { .. } => "Process Read Failed",
            Error::UnknownPid { .. } => "Unknown Process",
            Error::BinderFailed { .. } => "Binder Coordination Failed",
            Error::CgroupFailed { .. } => "Cgroup Freeze Failed",
            Error::SignalFailed { .. } => "Signal Delivery Failed",
            Error::ActionRetry { .. } => "Action Retry Needed",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::DozeRejected { .. } => "Doze Transition Rejected",
            Error::IpcMalformed { .. } => "Malformed IPC Frame",
            Error::IpcUnknownType { .. } => "Unknown IPC Message",
            Error::IpcRejected { .. } => "IPC Command Rejected",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::CapabilityMissing { .. } => "Missing Kernel Capability",
        }
    }
}

/// JSON-serializable projection of an [`Error`], sent as the `resp.error`
/// IPC payload and used for structured log entries.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    pub suggested_action: SuggestedAction,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
        }
    }
}

impl StructuredError {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code))
    }
}

/// Format an error for human-readable stderr output.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, reset) = if use_color { ("\x1b[31m", "\x1b[0m") } else { ("", "") };
    format!("{red}✗{reset} {}\n  Reason: {}", err.headline(), err)
}
