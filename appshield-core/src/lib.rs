//! AppShield core library exports
//!
//! The engine that turns a stream of UI change events into allow/deny
//! enforcement: the allowlist resolver, the event classifier, the
//! enforcement controller and the durable policy store, plus the
//! host-facing traits they are wired to.

pub mod allowlist;
pub mod classifier;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod event;
pub mod host;
pub mod policy;
pub mod shield;

pub use allowlist::{AllowSet, AllowlistResolver};
pub use classifier::{Classifier, Signal};
pub use config::ShieldConfig;
pub use enforcement::EnforcementController;
pub use event::{EventKind, UiEvent, UiNode};
pub use policy::{PolicyState, PolicyStore};
pub use shield::{Shield, ShieldHandle};
