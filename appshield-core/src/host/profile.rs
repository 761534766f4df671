//! Static device profile - a [`DeviceIntrospection`] backed by a YAML file
//!
//! Used by the CLI to replay event logs against a described device and by
//! tests that need a deterministic device.
//!
//! ```yaml
//! manufacturer: Xiaomi
//! launcher: com.miui.home
//! sms: com.google.android.apps.messaging
//! call_handlers: [com.google.android.dialer]
//! settings: com.android.settings
//! installed:
//!   - package_id: com.some.game
//!     label: Some Game
//!   - package_id: com.miui.powerkeeper
//!     system: true
//!     launchable: false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::{DeviceIntrospection, InstalledPackage};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDevice {
    #[serde(default)]
    pub manufacturer: Option<String>,

    #[serde(default)]
    pub launcher: Option<String>,

    #[serde(default)]
    pub sms: Option<String>,

    #[serde(default)]
    pub call_handlers: Vec<String>,

    #[serde(default)]
    pub contacts: Option<String>,

    #[serde(default)]
    pub calendar: Option<String>,

    #[serde(default)]
    pub clock: Option<String>,

    #[serde(default)]
    pub settings: Option<String>,

    #[serde(default)]
    pub foreground: Option<String>,

    #[serde(default)]
    pub installed: Vec<InstalledPackage>,
}

impl StaticDevice {
    /// Load a device profile from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device profile: {}", path.display()))?;
        let device: StaticDevice = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse device profile: {}", path.display()))?;

        info!(
            "Loaded device profile from {:?} ({} installed packages)",
            path,
            device.installed.len()
        );
        Ok(device)
    }

    /// A stock device with a launcher, settings and dialer, and nothing else
    pub fn stock() -> Self {
        Self {
            manufacturer: Some("Google".to_string()),
            launcher: Some("com.google.android.apps.nexuslauncher".to_string()),
            sms: Some("com.google.android.apps.messaging".to_string()),
            call_handlers: vec!["com.google.android.dialer".to_string()],
            contacts: Some("com.google.android.contacts".to_string()),
            calendar: Some("com.google.android.calendar".to_string()),
            clock: Some("com.google.android.deskclock".to_string()),
            settings: Some("com.android.settings".to_string()),
            foreground: None,
            installed: vec![InstalledPackage {
                package_id: "com.android.systemui".to_string(),
                label: Some("System UI".to_string()),
                is_system: true,
                launchable: false,
            }],
        }
    }

    pub fn with_installed(mut self, package: InstalledPackage) -> Self {
        self.installed.push(package);
        self
    }
}

impl DeviceIntrospection for StaticDevice {
    fn manufacturer(&self) -> Result<Option<String>> {
        Ok(self.manufacturer.clone())
    }

    fn default_launcher(&self) -> Result<Option<String>> {
        Ok(self.launcher.clone())
    }

    fn default_sms(&self) -> Result<Option<String>> {
        Ok(self.sms.clone())
    }

    fn call_handlers(&self) -> Result<Vec<String>> {
        Ok(self.call_handlers.clone())
    }

    fn contacts_handler(&self) -> Result<Option<String>> {
        Ok(self.contacts.clone())
    }

    fn calendar_handler(&self) -> Result<Option<String>> {
        Ok(self.calendar.clone())
    }

    fn clock_handler(&self) -> Result<Option<String>> {
        Ok(self.clock.clone())
    }

    fn settings_package(&self) -> Result<Option<String>> {
        Ok(self.settings.clone())
    }

    fn is_installed(&self, package_id: &str) -> Result<bool> {
        Ok(self
            .installed
            .iter()
            .any(|p| p.package_id.eq_ignore_ascii_case(package_id)))
    }

    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self.installed.clone())
    }

    fn foreground_package(&self) -> Result<Option<String>> {
        Ok(self.foreground.clone())
    }
}
