//! Decision-table data for the classifier.
//!
//! Phrase lists are matched case-insensitively as substrings. The package
//! exception table is an ordered list of `(pattern, verdict)` pairs where the
//! first matching pattern wins.

use serde::{Deserialize, Serialize};

use crate::config::PackageRuleConfig;

/// Settings and security-center packages that can reach the enforcing
/// app's info, force-stop or permission screens
pub const SETTINGS_PACKAGES: &[&str] = &[
    "com.android.settings",
    "com.miui.securitycenter",
    "com.miui.securitycore",
    "com.motorola.launcher3",
    "com.motorola.motocare",
    "com.samsung.android.packageinstaller",
    "com.oneplus.security",
    "com.coloros.safecenter",
    "com.vivo.permissionmanager",
    "com.huawei.systemmanager",
];

/// Fallback marker for the platform settings app when the device does not
/// report one
pub const PLATFORM_SETTINGS_PACKAGE: &str = "com.android.settings";

/// App-info / force-stop screen markers
pub const APP_INFO_MARKERS: &[&str] = &["App info", "Force stop"];

/// Permissions screen marker
pub const PERMISSIONS_MARKER: &str = "Permissions";

/// Search input prefixes of "permissions". "per" subsumes the longer ones;
/// the full family is kept as listed.
pub const RESTRICTED_SEARCH_TERMS: &[&str] = &["permissions", "per", "perm", "permiss"];

/// Screen class fragments of developer / advanced settings activities
pub const DEVELOPER_SCREEN_CLASSES: &[&str] = &["SettingsHomepageActivity", "SubSettings", "Develop"];

/// Text on developer / advanced settings screens
pub const DEVELOPER_PHRASES: &[&str] = &[
    "Developer options",
    "Developer settings",
    "Developer mode",
    "Development settings",
    "Advanced settings",
    "System settings",
    "mock location",
];

/// Text on reset and diagnostic screens
pub const RESET_PHRASES: &[&str] = &[
    "Factory data reset",
    "Reset all settings",
    "Factory reset",
    "reset",
    "Digital Wellbeing",
    "Force stop",
    "stop",
    "Enabled apps",
    "storage",
    "battery",
    "Accessibility",
    "Power saving",
    "Battery Saver",
    "Second Space",
    "Reset accessibility",
];

/// Text that clears a reset/diagnostic match (the charging notification)
pub const RESET_ALLOW_PHRASES: &[&str] = &["battery is full"];

/// Permission manager screen reached outside of "Security and privacy"
pub const PERMISSION_MANAGER_MARKER: &str = "Permission manager";
pub const SECURITY_AND_PRIVACY_MARKER: &str = "Security and privacy";

/// Search/assistant package whose blocking is silent
pub const SILENT_BLOCK_PACKAGE: &str = "com.google.android.googlequicksearchbox";

/// Verdict of a package rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageVerdict {
    /// Never a foreground violation
    Allow,
    /// Always a foreground violation, even if allowlisted
    Block,
}

/// One entry of the package exception table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRule {
    /// Lowercased substring
    pub pattern: String,
    pub verdict: PackageVerdict,
}

impl PackageRule {
    pub fn new(pattern: &str, verdict: PackageVerdict) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            verdict,
        }
    }

    fn matches(&self, package_lower: &str) -> bool {
        package_lower.contains(&self.pattern)
    }
}

/// Built-in exceptions: home-screen variants, widgets, wallpaper, help,
/// restore and launcher components, plus a handful of OEM services that
/// surface as foreground windows.
const BUILTIN_EXCEPTIONS: &[&str] = &[
    "home",
    "timeweatherwidget",
    "ccc.ota",
    "wallpaper",
    "action",
    "help",
    "systemui",
    "android.as",
    "restore",
    "android.voc",
    "rsupport.aas2",
    "android.lool",
    ".powersaving.g3",
    "launcher",
];

/// Ordered package rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRules {
    rules: Vec<PackageRule>,
}

impl Default for PackageRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PackageRules {
    /// Only the built-in exceptions
    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN_EXCEPTIONS
                .iter()
                .map(|p| PackageRule::new(p, PackageVerdict::Allow))
                .collect(),
        }
    }

    /// Built-in exceptions followed by configured rules
    pub fn with_configured(configured: &[PackageRuleConfig]) -> Self {
        let mut rules = Self::builtin();
        rules.rules.extend(
            configured
                .iter()
                .map(|r| PackageRule::new(r.pattern.trim(), r.verdict)),
        );
        rules
    }

    /// Verdict of the first matching rule, if any
    pub fn evaluate(&self, package_id: &str) -> Option<PackageVerdict> {
        let package = package_id.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&package))
            .map(|rule| rule.verdict)
    }

    pub fn rules(&self) -> &[PackageRule] {
        &self.rules
    }
}

/// Whether `text` contains any of `phrases`, case-insensitively
pub fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let text = text.to_lowercase();
    phrases.iter().any(|p| text.contains(&p.to_lowercase()))
}
