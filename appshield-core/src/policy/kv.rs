//! Durable key/value storage backends for the policy store.
//!
//! Backends are assumed crash-consistent per key but not transactional
//! across keys. Two implementations ship with the engine:
//! - [`FileStore`] - a single JSON document, replaced atomically on write
//! - [`MemoryStore`] - process-local, with switchable fault injection

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::StoreError;

/// Durable get/set for the two value shapes the policy needs
pub trait KeyValueStore: Send + Sync {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError>;

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;

    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError>;

    fn set_string_set(&self, key: &str, value: &BTreeSet<String>) -> Result<(), StoreError>;
}

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Strings(BTreeSet<String>),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Bool(_) => "bool",
            StoredValue::Strings(_) => "string set",
        }
    }
}

fn expect_bool(key: &str, value: Option<&StoredValue>) -> Result<Option<bool>, StoreError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(StoreError::TypeMismatch {
            key: key.to_string(),
            expected: "bool",
            found: other.type_name(),
        }),
    }
}

fn expect_strings(
    key: &str,
    value: Option<&StoredValue>,
) -> Result<Option<BTreeSet<String>>, StoreError> {
    match value {
        None => Ok(None),
        Some(StoredValue::Strings(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StoreError::TypeMismatch {
            key: key.to_string(),
            expected: "string set",
            found: other.type_name(),
        }),
    }
}

/// File-backed store: one JSON object per file.
///
/// Every write rewrites the whole document through a temp file in the same
/// directory followed by a rename, so a crash leaves either the old or the
/// new document, never a torn one.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the platform data directory (`.../appshield/policy.json`)
    pub fn at_default_location() -> Option<Self> {
        Self::default_path().map(Self::new)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "appshield").map(|dirs| dirs.data_dir().join("policy.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<BTreeMap<String, StoredValue>, StoreError> {
        if !self.path.exists() {
            trace!("Policy store {:?} does not exist yet", self.path);
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    fn write_document(&self, document: &BTreeMap<String, StoredValue>) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(&content).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!("Persisted policy store to {:?}", self.path);
        Ok(())
    }

    fn update(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".to_string()))?;
        let mut document = match self.read_document() {
            Ok(document) => document,
            Err(StoreError::Corrupted { path, source }) => {
                warn!(
                    "Policy store {:?} is corrupted ({}) - starting a fresh document",
                    path, source
                );
                self.set_aside_corrupted();
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        document.insert(key.to_string(), value);
        self.write_document(&document)
    }

    /// Keep the unreadable document next to the store as `<name>.corrupt`
    fn set_aside_corrupted(&self) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".corrupt");
        if let Err(e) = std::fs::rename(&self.path, &backup) {
            warn!("Could not move corrupted policy store aside: {}", e);
        }
    }
}

impl KeyValueStore for FileStore {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        let document = self.read_document()?;
        expect_bool(key, document.get(key))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.update(key, StoredValue::Bool(value))
    }

    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError> {
        let document = self.read_document()?;
        expect_strings(key, document.get(key))
    }

    fn set_string_set(&self, key: &str, value: &BTreeSet<String>) -> Result<(), StoreError> {
        self.update(key, StoredValue::Strings(value.clone()))
    }
}

/// Process-local store.
///
/// `set_unavailable(true)` makes every subsequent call fail, which is how
/// tests exercise the fail-open paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, StoredValue>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn values(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredValue>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        self.values
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        expect_bool(key, self.values()?.get(key))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.values()?.insert(key.to_string(), StoredValue::Bool(value));
        Ok(())
    }

    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StoreError> {
        expect_strings(key, self.values()?.get(key))
    }

    fn set_string_set(&self, key: &str, value: &BTreeSet<String>) -> Result<(), StoreError> {
        self.values()?
            .insert(key.to_string(), StoredValue::Strings(value.clone()));
        Ok(())
    }
}
