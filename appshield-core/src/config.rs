//! Shield configuration
//!
//! Loaded from `shield.yml`. Resolution order:
//! 1. Explicit path (CLI `--config`), which must exist
//! 2. `<platform config dir>/appshield/shield.yml`
//! 3. Built-in defaults when neither exists
//!
//! ```yaml
//! identity:
//!   package_id: com.appshield
//!   display_name: AppShield
//! settings_packages:
//!   - com.transsion.phonemaster
//! package_rules:
//!   - pattern: kidsmode
//!     verdict: allow
//! event_queue_capacity: 256
//! ```
//!
//! Timing (cool-downs, deferred action delays) is fixed; see
//! [`crate::enforcement`].

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::classifier::rules::PackageVerdict;
use crate::error::ConfigError;

/// Who the enforcing app is; used for self-protection and bypass detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldIdentity {
    /// Package id of the enforcing app
    pub package_id: String,

    /// Name shown for the enforcing app in system settings screens
    pub display_name: String,
}

impl Default for ShieldIdentity {
    fn default() -> Self {
        Self {
            package_id: "com.appshield".to_string(),
            display_name: "AppShield".to_string(),
        }
    }
}

/// Extra package exception rule from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRuleConfig {
    /// Case-insensitive substring of the package id
    pub pattern: String,
    pub verdict: PackageVerdict,
}

/// Top-level shield configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldConfig {
    #[serde(default)]
    pub identity: ShieldIdentity,

    /// Additional settings/security-center packages checked for bypass screens
    #[serde(default)]
    pub settings_packages: Vec<String>,

    /// Additional package rules, evaluated after the built-in exceptions
    #[serde(default)]
    pub package_rules: Vec<PackageRuleConfig>,

    /// Capacity of the bounded event channel; events beyond it are dropped
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Override for the durable policy store location
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_event_queue_capacity() -> usize {
    256
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            identity: ShieldIdentity::default(),
            settings_packages: Vec::new(),
            package_rules: Vec::new(),
            event_queue_capacity: default_event_queue_capacity(),
            store_path: None,
        }
    }
}

impl ShieldConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading shield config from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ShieldConfig =
            serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;

        debug!(
            "Loaded config: identity={}, {} extra settings packages, {} package rules",
            config.identity.package_id,
            config.settings_packages.len(),
            config.package_rules.len()
        );
        Ok(config)
    }

    /// Resolve the config using an optional explicit path, then the
    /// platform location, then defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                debug!("No shield config at {:?} - using defaults", path);
                Ok(Self::default())
            }
            None => {
                debug!("No platform config directory - using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<platform config dir>/appshield/shield.yml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "appshield").map(|dirs| dirs.config_dir().join("shield.yml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.package_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "identity.package_id must not be empty".to_string(),
            ));
        }
        if self.identity.display_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "identity.display_name must not be empty".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self
            .package_rules
            .iter()
            .find(|r| r.pattern.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "package rule with verdict {:?} has an empty pattern",
                rule.verdict
            )));
        }
        Ok(())
    }
}
