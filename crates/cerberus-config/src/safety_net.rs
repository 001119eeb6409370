//! The safety net: packages that must never be frozen regardless of
//! per-package policy, because freezing them risks bricking core platform
//! functionality (telephony, input method, launcher) rather than just
//! annoying the user.
//!
//! Grounded on the original daemon's `is_critical_system_app()`: every
//! `com.android.` package is exempt, plus a curated list of OEM system
//! packages (launcher, input method, security stack) known to misbehave
//! when frozen.

use cerberus_common::policy::AppPolicy;
use std::collections::HashSet;

const ANDROID_SYSTEM_PREFIX: &str = "com.android.";

/// OEM and AOSP packages that are safety-net protected even though they
/// don't carry the `com.android.` prefix. Drawn from `critical_system_apps_`:
/// core runtime, root/module tooling (Magisk, LSposed, KernelSU), launchers,
/// IMEs, and core Google service packages.
const CURATED_SAFETY_NET: &[&str] = &[
    "android",
    "system",
    "zygote",
    "zygote64",
    // Root and module management tooling: freezing these can brick root access.
    "com.topjohnwu.magisk",
    "org.lsposed.manager",
    "me.weishu.kernelsu",
    "top.canyie.dreamland.manager",
    // Launchers: freezing the active launcher breaks the home screen.
    "com.android.launcher",
    "com.android.launcher2",
    "app.lawnchair",
    "com.microsoft.launcher",
    "com.teslacoilsw.launcher",
    "com.hola.launcher",
    "com.gau.go.launcherex",
    "com.oppo.launcher",
    // Input methods: freezing the active IME leaves the device unable to type.
    "com.google.android.inputmethod.latin",
    "com.touchtype.swiftkey",
    "com.baidu.input",
    "com.sohu.inputmethod.sogou.xiaomi",
    "com.iflytek.inputmethod",
    "com.tencent.qqpinyin",
    "im.weshine.keyboard",
    // Package installers: freezing mid-install corrupts package state.
    "com.google.android.packageinstaller",
    "com.android.packageinstaller",
    // Telephony and core Google/Android services.
    "com.google.android.gms",
    "com.google.android.gsf",
    "com.google.android.gms.supervision",
    "com.google.android.ext.services",
    "com.google.android.permissioncontroller",
    "com.google.android.webview",
];

pub struct SafetyNet {
    curated: HashSet<&'static str>,
}

impl SafetyNet {
    pub fn new() -> Self {
        SafetyNet {
            curated: CURATED_SAFETY_NET.iter().copied().collect(),
        }
    }

    /// Whether a package is safety-net protected, independent of any
    /// per-package policy stored for it.
    pub fn is_protected(&self, package_name: &str) -> bool {
        package_name.starts_with(ANDROID_SYSTEM_PREFIX) || self.curated.contains(package_name)
    }

    /// The policy that should actually govern this package: a stored policy
    /// unless the package is safety-net protected, in which case `Exempted`
    /// always wins. This is the single call site the rest of the daemon
    /// should use instead of reading a stored policy directly.
    pub fn effective_policy(&self, package_name: &str, stored: AppPolicy) -> AppPolicy {
        if self.is_protected(package_name) {
            AppPolicy::Exempted
        } else {
            stored
        }
    }
}

impl Default for SafetyNet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn android_prefix_is_always_protected() {
        let net = SafetyNet::new();
        assert!(net.is_protected("com.android.systemui"));
        assert!(net.is_protected("com.android.phone"));
    }

    #[test]
    fn curated_package_is_protected() {
        let net = SafetyNet::new();
        assert!(net.is_protected("com.google.android.gms"));
    }

    #[test]
    fn root_tooling_and_launcher_and_ime_are_protected() {
        let net = SafetyNet::new();
        assert!(net.is_protected("com.topjohnwu.magisk"));
        assert!(net.is_protected("org.lsposed.manager"));
        assert!(net.is_protected("me.weishu.kernelsu"));
        assert!(net.is_protected("app.lawnchair"));
        assert!(net.is_protected("com.touchtype.swiftkey"));
    }

    #[test]
    fn ordinary_package_is_not_protected() {
        let net = SafetyNet::new();
        assert!(!net.is_protected("com.example.game"));
    }

    #[test]
    fn effective_policy_overrides_stored_for_protected_packages() {
        let net = SafetyNet::new();
        let effective = net.effective_policy("com.android.systemui", AppPolicy::Strict);
        assert_eq!(effective, AppPolicy::Exempted);
    }

    #[test]
    fn effective_policy_passes_through_for_unprotected_packages() {
        let net = SafetyNet::new();
        let effective = net.effective_policy("com.example.game", AppPolicy::Strict);
        assert_eq!(effective, AppPolicy::Strict);
    }
}
