//! Per-package freeze policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Freeze aggressiveness assigned to a package.
///
/// Ordinal values are persisted in the policy store and over the admin IPC
/// protocol, matching the original daemon's `AppPolicy` enum exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum AppPolicy {
    /// Never frozen, regardless of background time. Used for safety-net
    /// packages and anything the user has opted out.
    Exempted = 0,
    /// Long leash: only frozen after a generous idle period.
    Important = 1,
    /// The default policy for ordinary apps.
    Standard = 2,
    /// Short leash: frozen quickly after leaving the foreground.
    Strict = 3,
}

impl AppPolicy {
    /// How long an instance may sit in `BackgroundIdle` before a freeze is
    /// attempted. `Exempted` has no timeout since it is never frozen.
    pub fn background_timeout(self) -> Option<Duration> {
        match self {
            AppPolicy::Exempted => None,
            AppPolicy::Important => Some(Duration::from_secs(180)),
            AppPolicy::Standard => Some(Duration::from_secs(30)),
            AppPolicy::Strict => Some(Duration::from_secs(10)),
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(AppPolicy::Exempted),
            1 => Some(AppPolicy::Important),
            2 => Some(AppPolicy::Standard),
            3 => Some(AppPolicy::Strict),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl Default for AppPolicy {
    fn default() -> Self {
        AppPolicy::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_match_spec() {
        assert_eq!(AppPolicy::Important.background_timeout(), Some(Duration::from_secs(180)));
        assert_eq!(AppPolicy::Standard.background_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(AppPolicy::Strict.background_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(AppPolicy::Exempted.background_timeout(), None);
    }

    #[test]
    fn roundtrip_ordinals() {
        for p in [AppPolicy::Exempted, AppPolicy::Important, AppPolicy::Standard, AppPolicy::Strict] {
            assert_eq!(AppPolicy::from_i32(p.as_i32()), Some(p));
        }
        assert_eq!(AppPolicy::from_i32(99), None);
    }

    #[test]
    fn default_is_standard() {
        assert!(matches!(AppPolicy::default(), AppPolicy::Standard));
    }
}
