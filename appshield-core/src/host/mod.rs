//! Host collaborator traits
//!
//! The engine never talks to the operating system directly. Everything it
//! needs from the device goes through one of these traits:
//! - [`ActionSink`] - global navigation and process termination
//! - [`FeedbackSink`] - transient pop-ups and persistent notifications
//! - [`DeviceIntrospection`] - best-effort lookups of default handlers and
//!   installed packages
//!
//! The durable key/value store lives in [`crate::policy::kv`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod profile;
pub mod recording;

pub use profile::StaticDevice;
pub use recording::{RecordedAction, RecordingActions, RecordingFeedback, UnavailableDevice};

/// OS action primitives.
///
/// Calls are fire-and-forget: returning `Ok` means the request was handed
/// to the OS, not that the OS state already changed. Errors are logged by
/// the caller and never retried within the same event.
pub trait ActionSink: Send + Sync {
    fn navigate_back(&self) -> Result<()>;

    fn navigate_home(&self) -> Result<()>;

    fn terminate_process(&self, package_id: &str) -> Result<()>;
}

/// User feedback surfaces
pub trait FeedbackSink: Send + Sync {
    /// Short-lived pop-up (may be silently swallowed by some OS skins)
    fn show_transient(&self, message: &str) -> Result<()>;

    /// Low-priority notification used as a fallback for the pop-up
    fn show_persistent(&self, message: &str) -> Result<()>;

    /// Whether the host currently holds notification permission
    fn notifications_permitted(&self) -> bool;
}

/// One installed package as reported by the host package manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub package_id: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Flagged as a system app by the OS
    #[serde(default, rename = "system")]
    pub is_system: bool,

    /// Has a launcher entry (user can open it from the home screen)
    #[serde(default = "default_launchable")]
    pub launchable: bool,
}

fn default_launchable() -> bool {
    true
}

/// Best-effort device lookups.
///
/// Every method may fail or return nothing; callers treat both as
/// "unknown" and carry on.
pub trait DeviceIntrospection: Send + Sync {
    /// Device manufacturer string (e.g. "samsung", "Xiaomi")
    fn manufacturer(&self) -> Result<Option<String>>;

    /// Package handling the HOME intent
    fn default_launcher(&self) -> Result<Option<String>>;

    /// Default SMS application
    fn default_sms(&self) -> Result<Option<String>>;

    /// Every package able to place a phone call
    fn call_handlers(&self) -> Result<Vec<String>>;

    /// Package handling the contact picker
    fn contacts_handler(&self) -> Result<Option<String>>;

    /// Package handling the calendar category
    fn calendar_handler(&self) -> Result<Option<String>>;

    /// Package handling "show alarms"
    fn clock_handler(&self) -> Result<Option<String>>;

    /// Package handling the system settings intent
    fn settings_package(&self) -> Result<Option<String>>;

    /// Whether a specific package is installed
    fn is_installed(&self, package_id: &str) -> Result<bool>;

    /// Every installed package
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>>;

    /// Most recently used foreground package
    fn foreground_package(&self) -> Result<Option<String>>;
}
