//! Policy State Store - the durable on/off switches and the custom allowlist.
//!
//! Reads come from an in-memory snapshot that is swapped whole on every
//! write, so the event pipeline never sees a half-updated custom set and
//! never touches storage. Writes update the snapshot first and then go to
//! the durable backend; a storage failure is logged and never surfaced.
//!
//! Loading fails open: if any key cannot be read the whole state falls back
//! to the defaults (blocking off, empty custom set, feedback on) so that a
//! corrupted store can never lock a device.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub mod kv;

pub use kv::{FileStore, KeyValueStore, MemoryStore};

/// Storage key for the global blocking switch
pub const KEY_BLOCK_ALL: &str = "block_all_enabled";
/// Storage key for the user-supplied allowlist
pub const KEY_CUSTOM_ALLOWED: &str = "custom_allowed_apps";
/// Storage key for the pop-up/notification switch
pub const KEY_FEEDBACK: &str = "feedback_enabled";

/// Current policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    pub block_all_enabled: bool,

    /// Lowercased package ids
    pub custom_allowed: BTreeSet<String>,

    pub feedback_enabled: bool,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            block_all_enabled: false,
            custom_allowed: BTreeSet::new(),
            feedback_enabled: true,
        }
    }
}

/// Lowercase, trim and drop blank package ids
pub fn normalize_packages<I, S>(packages: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    packages
        .into_iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Owner of [`PolicyState`]
pub struct PolicyStore {
    backend: Arc<dyn KeyValueStore>,
    snapshot: RwLock<Arc<PolicyState>>,
    /// Serializes snapshot update + persist so the backend sees writes in
    /// the same order as readers do
    write_lock: Mutex<()>,
}

impl PolicyStore {
    /// Open the store, loading the persisted state (or defaults)
    pub fn open(backend: Arc<dyn KeyValueStore>) -> Self {
        let state = Self::load(backend.as_ref());
        info!(
            "Policy store opened: block_all={}, custom_allowed={}, feedback={}",
            state.block_all_enabled,
            state.custom_allowed.len(),
            state.feedback_enabled
        );
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(state)),
            write_lock: Mutex::new(()),
        }
    }

    /// Process-local store, mostly for tests and dry runs
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryStore::new()))
    }

    fn load(backend: &dyn KeyValueStore) -> PolicyState {
        match Self::try_load(backend) {
            Ok(state) => state,
            Err(e) => {
                warn!("Policy store read failed, using safe defaults: {}", e);
                PolicyState::default()
            }
        }
    }

    fn try_load(backend: &dyn KeyValueStore) -> Result<PolicyState, StoreError> {
        let defaults = PolicyState::default();
        Ok(PolicyState {
            block_all_enabled: backend
                .get_bool(KEY_BLOCK_ALL)?
                .unwrap_or(defaults.block_all_enabled),
            custom_allowed: backend
                .get_string_set(KEY_CUSTOM_ALLOWED)?
                .map(normalize_packages)
                .unwrap_or_default(),
            feedback_enabled: backend
                .get_bool(KEY_FEEDBACK)?
                .unwrap_or(defaults.feedback_enabled),
        })
    }

    /// Current state (cloned)
    pub fn get(&self) -> PolicyState {
        self.snapshot().as_ref().clone()
    }

    /// Current state without cloning the custom set
    pub fn snapshot(&self) -> Arc<PolicyState> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Re-read the durable backend, replacing the snapshot.
    ///
    /// Picks up writes made by another process sharing the same backend.
    pub fn reload(&self) -> PolicyState {
        let _guard = self.write_lock.lock();
        let state = Self::load(self.backend.as_ref());
        self.swap(state.clone());
        debug!("Policy store reloaded");
        state
    }

    pub fn set_block_all(&self, enabled: bool) {
        self.write(
            |state| state.block_all_enabled = enabled,
            |backend| backend.set_bool(KEY_BLOCK_ALL, enabled),
        );
        info!("Blocking {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_custom_allowed<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = normalize_packages(packages);
        let count = packages.len();
        let persisted = packages.clone();
        self.write(
            move |state| state.custom_allowed = packages,
            |backend| backend.set_string_set(KEY_CUSTOM_ALLOWED, &persisted),
        );
        info!("Custom allowlist set to {} packages", count);
    }

    pub fn set_feedback_enabled(&self, enabled: bool) {
        self.write(
            |state| state.feedback_enabled = enabled,
            |backend| backend.set_bool(KEY_FEEDBACK, enabled),
        );
        info!("Feedback {}", if enabled { "enabled" } else { "disabled" });
    }

    fn write(
        &self,
        mutate: impl FnOnce(&mut PolicyState),
        persist: impl FnOnce(&dyn KeyValueStore) -> Result<(), StoreError>,
    ) {
        let _guard = self.write_lock.lock();

        let mut next = self.get();
        mutate(&mut next);
        self.swap(next);

        if let Err(e) = persist(self.backend.as_ref()) {
            warn!("Failed to persist policy change (kept in memory): {}", e);
        }
    }

    fn swap(&self, state: PolicyState) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Arc::new(state),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(state),
        }
    }
}

/// Whether a host boot/update receiver should restart the pipeline.
///
/// Reads straight from the backend; any fault answers `false`.
pub fn should_resume_after_boot(backend: &dyn KeyValueStore) -> bool {
    match backend.get_bool(KEY_BLOCK_ALL) {
        Ok(enabled) => enabled.unwrap_or(false),
        Err(e) => {
            warn!("Could not read blocking flag at boot: {}", e);
            false
        }
    }
}
