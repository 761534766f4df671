//! Static catalog of known OEM/platform system packages, grouped by vendor
//! family. The data lives in `catalog/system_apps.yml` and is embedded at
//! build time.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error};

const CATALOG_YAML: &str = include_str!("../../catalog/system_apps.yml");

/// Parsed once on first use
pub static SYSTEM_CATALOG: Lazy<SystemCatalog> = Lazy::new(|| {
    SystemCatalog::parse(CATALOG_YAML).unwrap_or_else(|e| {
        error!("Embedded system app catalog failed to parse: {}", e);
        SystemCatalog::default()
    })
});

/// Device vendor family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorFamily {
    /// Stock Android / Google
    Aosp,
    Xiaomi,
    Samsung,
    OnePlus,
    /// OPPO and Realme (ColorOS)
    Oppo,
    /// Huawei and Honor
    Huawei,
    Vivo,
    Motorola,
    Asus,
    Lg,
    Sony,
    Other,
}

impl VendorFamily {
    /// Map a manufacturer string to its family
    pub fn from_manufacturer(manufacturer: &str) -> Self {
        match manufacturer.trim().to_lowercase().as_str() {
            "google" | "android" => VendorFamily::Aosp,
            "xiaomi" | "redmi" | "poco" => VendorFamily::Xiaomi,
            "samsung" => VendorFamily::Samsung,
            "oneplus" => VendorFamily::OnePlus,
            "oppo" | "realme" => VendorFamily::Oppo,
            "huawei" | "honor" => VendorFamily::Huawei,
            "vivo" | "iqoo" => VendorFamily::Vivo,
            "motorola" => VendorFamily::Motorola,
            "asus" => VendorFamily::Asus,
            "lge" | "lg" => VendorFamily::Lg,
            "sony" => VendorFamily::Sony,
            _ => VendorFamily::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorFamily::Aosp => "aosp",
            VendorFamily::Xiaomi => "xiaomi",
            VendorFamily::Samsung => "samsung",
            VendorFamily::OnePlus => "oneplus",
            VendorFamily::Oppo => "oppo",
            VendorFamily::Huawei => "huawei",
            VendorFamily::Vivo => "vivo",
            VendorFamily::Motorola => "motorola",
            VendorFamily::Asus => "asus",
            VendorFamily::Lg => "lg",
            VendorFamily::Sony => "sony",
            VendorFamily::Other => "other",
        }
    }
}

impl fmt::Display for VendorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemCatalog {
    #[serde(default)]
    pub families: BTreeMap<VendorFamily, Vec<String>>,

    #[serde(default)]
    pub extras: Vec<String>,
}

impl SystemCatalog {
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml_ng::Error> {
        let catalog: SystemCatalog = serde_yaml_ng::from_str(yaml)?;
        debug!(
            "System catalog: {} families, {} packages, {} extras",
            catalog.families.len(),
            catalog.families.values().map(Vec::len).sum::<usize>(),
            catalog.extras.len()
        );
        Ok(catalog)
    }

    /// Every catalog package across all families plus the extras
    pub fn all_packages(&self) -> impl Iterator<Item = &str> {
        self.families
            .values()
            .flatten()
            .chain(self.extras.iter())
            .map(String::as_str)
    }

    /// Packages listed for one family
    pub fn family(&self, family: VendorFamily) -> &[String] {
        self.families
            .get(&family)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
