//! Allowlist Resolver - merges the static catalog, device-specific default
//! handlers and the user's custom list into one case-insensitive set.
//!
//! Device discovery is expensive and changes rarely, so it is captured in a
//! [`DefaultAllowlist`] that the shield rebuilds on demand. The per-event
//! [`AllowSet`] is that shared default set plus the current custom list,
//! which is cheap to assemble and always reflects the latest policy.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ShieldIdentity;
use crate::host::{DeviceIntrospection, InstalledPackage};

pub mod catalog;

pub use catalog::{SystemCatalog, VendorFamily, SYSTEM_CATALOG};

/// Substring that marks a package as part of the system UI
pub const SYSTEM_UI_MARKER: &str = "systemui";

/// Allowed when installed
pub const MAPS_PACKAGE: &str = "com.google.android.apps.maps";

/// Substrings that mark an OS-flagged system package as an OEM system
/// component worth allowing
const OEM_SYSTEM_MARKERS: &[&str] = &[
    "miui",
    "xiaomi",
    "systemui",
    "globalminusscreen",
    "securitycenter",
    "powerkeeper",
    "optimizecenter",
];

/// Prefixes with the same meaning as [`OEM_SYSTEM_MARKERS`]
const OEM_SYSTEM_PREFIXES: &[&str] = &["com.mi.", "com.miui."];

/// Whether a package id names a system-UI component
pub fn is_system_ui(package_id: &str) -> bool {
    package_id.to_lowercase().contains(SYSTEM_UI_MARKER)
}

/// Device-derived part of the allowlist
#[derive(Debug, Clone, Default, Serialize)]
pub struct DefaultAllowlist {
    /// Lowercased package ids
    packages: HashSet<String>,

    /// The enforcing app itself (lowercased)
    self_package: String,

    /// Active launcher, when known (lowercased)
    launcher: Option<String>,

    /// Active settings app, when known (lowercased)
    settings: Option<String>,

    /// Installed packages carrying the system-UI marker (lowercased)
    system_ui: HashSet<String>,

    manufacturer: Option<String>,

    vendor: Option<VendorFamily>,
}

impl DefaultAllowlist {
    /// Only the enforcing app and the static catalog; what resolution
    /// degrades to when the device cannot be queried at all
    pub fn catalog_only(identity: &ShieldIdentity) -> Self {
        let self_package = identity.package_id.to_lowercase();
        let mut packages: HashSet<String> =
            SYSTEM_CATALOG.all_packages().map(str::to_lowercase).collect();
        packages.insert(self_package.clone());
        Self {
            packages,
            self_package,
            ..Default::default()
        }
    }

    pub fn contains(&self, package_id: &str) -> bool {
        self.packages.contains(&package_id.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Sorted package ids
    pub fn packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.packages.iter().cloned().collect();
        packages.sort();
        packages
    }

    pub fn self_package(&self) -> &str {
        &self.self_package
    }

    pub fn launcher(&self) -> Option<&str> {
        self.launcher.as_deref()
    }

    pub fn settings_package(&self) -> Option<&str> {
        self.settings.as_deref()
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn vendor(&self) -> Option<VendorFamily> {
        self.vendor
    }

    /// Self, launcher, or system UI: never classified
    pub fn is_protected(&self, package_id: &str) -> bool {
        let package = package_id.to_lowercase();
        package == self.self_package
            || self.launcher.as_deref() == Some(package.as_str())
            || self.system_ui.contains(&package)
            || package.contains(SYSTEM_UI_MARKER)
    }
}

/// Allowlist in effect for one event
#[derive(Debug, Clone)]
pub struct AllowSet {
    defaults: Arc<DefaultAllowlist>,
    custom: BTreeSet<String>,
}

impl AllowSet {
    /// `custom` is expected to be normalized already (see
    /// [`crate::policy::normalize_packages`])
    pub fn new(defaults: Arc<DefaultAllowlist>, custom: BTreeSet<String>) -> Self {
        Self { defaults, custom }
    }

    /// Case-insensitive membership in either part
    pub fn contains(&self, package_id: &str) -> bool {
        let package = package_id.to_lowercase();
        self.defaults.packages.contains(&package) || self.custom.contains(&package)
    }

    pub fn defaults(&self) -> &DefaultAllowlist {
        &self.defaults
    }

    pub fn custom_packages(&self) -> &BTreeSet<String> {
        &self.custom
    }

    pub fn is_protected(&self, package_id: &str) -> bool {
        self.defaults.is_protected(package_id)
    }

    pub fn launcher(&self) -> Option<&str> {
        self.defaults.launcher()
    }

    pub fn settings_package(&self) -> Option<&str> {
        self.defaults.settings_package()
    }
}

/// Resolves the allowlist from the device and the static catalog
pub struct AllowlistResolver {
    device: Arc<dyn DeviceIntrospection>,
    identity: ShieldIdentity,
}

impl AllowlistResolver {
    pub fn new(device: Arc<dyn DeviceIntrospection>, identity: ShieldIdentity) -> Self {
        Self { device, identity }
    }

    /// Full resolution including the custom list
    pub fn resolve(&self, custom: &BTreeSet<String>) -> AllowSet {
        AllowSet::new(Arc::new(self.resolve_defaults()), custom.clone())
    }

    /// Query the device and merge with the catalog.
    ///
    /// Never fails: each lookup that errors is logged and skipped.
    pub fn resolve_defaults(&self) -> DefaultAllowlist {
        let start = Instant::now();
        let mut allowlist = DefaultAllowlist::catalog_only(&self.identity);

        let manufacturer = self.lookup("manufacturer", self.device.manufacturer()).flatten();
        let launcher = self
            .lookup("default launcher", self.device.default_launcher())
            .flatten()
            .map(|p| p.to_lowercase());
        let settings = self
            .lookup("settings package", self.device.settings_package())
            .flatten()
            .map(|p| p.to_lowercase());

        let mut dynamic: Vec<String> = Vec::new();
        dynamic.extend(launcher.clone());
        dynamic.extend(settings.clone());
        dynamic.extend(self.lookup("default SMS", self.device.default_sms()).flatten());
        dynamic.extend(self.lookup("contacts", self.device.contacts_handler()).flatten());
        dynamic.extend(self.lookup("calendar", self.device.calendar_handler()).flatten());
        dynamic.extend(self.lookup("clock", self.device.clock_handler()).flatten());
        dynamic.extend(
            self.lookup("call handlers", self.device.call_handlers())
                .unwrap_or_default(),
        );
        if self
            .lookup("maps install state", self.device.is_installed(MAPS_PACKAGE))
            .unwrap_or(false)
        {
            dynamic.push(MAPS_PACKAGE.to_string());
        }

        let installed = self
            .lookup("installed packages", self.device.installed_packages())
            .unwrap_or_default();
        let system_ui: HashSet<String> = installed
            .iter()
            .map(|p| p.package_id.to_lowercase())
            .filter(|p| p.contains(SYSTEM_UI_MARKER))
            .collect();
        dynamic.extend(system_ui.iter().cloned());
        dynamic.extend(
            installed
                .iter()
                .filter(|p| !p.launchable)
                .map(|p| p.package_id.clone()),
        );
        dynamic.extend(
            installed
                .iter()
                .filter(|p| is_oem_system_component(p))
                .map(|p| p.package_id.clone()),
        );

        let catalog_count = allowlist.packages.len();
        allowlist.packages.extend(
            dynamic
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty()),
        );

        let vendor = manufacturer.as_deref().map(VendorFamily::from_manufacturer);
        if let Some(family) = vendor {
            let vendor_count = SYSTEM_CATALOG.family(family).len();
            if vendor_count > 0 {
                info!(
                    "{} device detected - {} vendor-specific catalog entries active",
                    family, vendor_count
                );
            }
        }

        allowlist.launcher = launcher;
        allowlist.settings = settings;
        allowlist.system_ui = system_ui;
        allowlist.manufacturer = manufacturer;
        allowlist.vendor = vendor;

        info!(
            "Resolved {} default allowed packages ({} from catalog, {} discovered) in {:?}",
            allowlist.packages.len(),
            catalog_count,
            allowlist.packages.len() - catalog_count,
            start.elapsed()
        );
        allowlist
    }

    fn lookup<T>(&self, what: &str, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Device lookup '{}' failed, treating as unknown: {:#}", what, e);
                None
            }
        }
    }
}

fn is_oem_system_component(package: &InstalledPackage) -> bool {
    if !package.is_system {
        return false;
    }
    let id = package.package_id.to_lowercase();
    let matched = OEM_SYSTEM_MARKERS.iter().any(|m| id.contains(m))
        || OEM_SYSTEM_PREFIXES.iter().any(|p| id.starts_with(p));
    if matched {
        debug!("Allowing OEM system component {}", id);
    }
    matched
}
