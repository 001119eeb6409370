//! Process exit codes for `cerberusd`.
//!
//! Narrowed from the teacher's wide 0-29 outcome/error range: this daemon
//! has no plan/apply workflow to report through its exit code, just
//! success-or-why-init-failed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run or clean shutdown.
    Ok = 0,
    /// `master.json` or the policy database failed validation.
    ConfigError = 10,
    /// Required kernel feature unavailable at startup (no `/proc`, no
    /// cgroup v2 and no `/dev/binder`, socket bind failure).
    InitFailure = 11,
    /// Daemon is not running with the privileges it needs (not root, or
    /// missing `CAP_SYS_ADMIN`/equivalent for the freezer).
    PermissionDenied = 12,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn code_name(self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InitFailure => "ERR_INIT",
            ExitCode::PermissionDenied => "ERR_PERMISSION",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

impl From<&cerberus_common::Error> for ExitCode {
    fn from(err: &cerberus_common::Error) -> Self {
        match err {
            cerberus_common::Error::ConfigNotFound { .. }
            | cerberus_common::Error::ConfigMalformed { .. }
            | cerberus_common::Error::ConfigInvalid { .. } => ExitCode::ConfigError,
            cerberus_common::Error::PermissionDenied { .. } => ExitCode::PermissionDenied,
            _ => ExitCode::InitFailure,
        }
    }
}
