//! Process and app-instance identity types.
//!
//! An app instance is a (package name, Android user id) pair; this is the
//! unit of policy and freezing state in the daemon. A process is identified
//! by its kernel pid.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kernel process ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// Android multi-user user id (0 for the primary/owner user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the Android user id from a Linux uid: `uid / 100000`.
///
/// Android assigns each user a 100000-wide uid range; app uids within a
/// user's range are `100000 * user_id + app_id`.
pub fn user_id_from_uid(uid: u32) -> UserId {
    UserId(uid / 100_000)
}

/// Unique key for an app instance: a package running under a specific user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub package_name: String,
    pub user_id: UserId,
}

impl InstanceKey {
    pub fn new(package_name: impl Into<String>, user_id: UserId) -> Self {
        Self {
            package_name: package_name.into(),
            user_id,
        }
    }

    /// Sanitized form used for cgroup directory names: `.` becomes `_`.
    ///
    /// Mirrors the original daemon's `get_instance_cgroup_path()`.
    pub fn sanitized_package(&self) -> String {
        self.package_name.replace('.', "_")
    }

    /// The cgroup directory name for this instance: `cerberus_<pkg>_<uid>`.
    pub fn cgroup_dir_name(&self) -> String {
        format!("cerberus_{}_{}", self.sanitized_package(), self.user_id.0)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package_name, self.user_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_derivation() {
        assert_eq!(user_id_from_uid(10123), UserId(0));
        assert_eq!(user_id_from_uid(1010123), UserId(10));
    }

    #[test]
    fn sanitized_package_replaces_dots() {
        let key = InstanceKey::new("com.example.app", UserId(0));
        assert_eq!(key.sanitized_package(), "com_example_app");
        assert_eq!(key.cgroup_dir_name(), "cerberus_com_example_app_0");
    }

    #[test]
    fn display_format() {
        let key = InstanceKey::new("com.example.app", UserId(10));
        assert_eq!(key.to_string(), "com.example.app:10");
    }
}
