//! Process-scoped registry of the running shield.
//!
//! Configuration callers outside the event pipeline (settings screens, the
//! CLI, a boot receiver) look the running pipeline up here instead of
//! holding on to it. The pipeline registers on start and deregisters when
//! it stops or is deactivated.

use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::ShieldHandle;

static CURRENT: Lazy<RwLock<Option<ShieldHandle>>> = Lazy::new(|| RwLock::new(None));

/// Make `handle` the current shield, replacing any previous one
pub fn register(handle: &ShieldHandle) {
    let mut current = match CURRENT.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if current.is_some() {
        debug!("Replacing previously registered shield");
    }
    *current = Some(handle.clone());
    debug!("Shield registered");
}

/// Clear the registry if `handle` is still the registered shield
pub fn deregister(handle: &ShieldHandle) {
    let mut current = match CURRENT.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if current
        .as_ref()
        .is_some_and(|registered| Arc::ptr_eq(&registered.inner, &handle.inner))
    {
        *current = None;
        debug!("Shield deregistered");
    }
}

/// The running shield, if any
pub fn current() -> Option<ShieldHandle> {
    match CURRENT.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Whether `handle` is the registered shield
pub fn is_registered(handle: &ShieldHandle) -> bool {
    current().is_some_and(|registered| Arc::ptr_eq(&registered.inner, &handle.inner))
}
