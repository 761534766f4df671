//! Shared helpers for the integration tests

#![allow(dead_code)]

use appshield_core::config::ShieldConfig;
use appshield_core::host::{RecordingActions, RecordingFeedback, StaticDevice};
use appshield_core::policy::PolicyStore;
use appshield_core::shield::{HostBindings, Shield, ShieldHandle};
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A started shield wired to recording sinks
pub struct TestShield {
    pub shield: Option<Shield>,
    pub handle: ShieldHandle,
    pub actions: Arc<RecordingActions>,
    pub feedback: Arc<RecordingFeedback>,
}

impl TestShield {
    /// Take the pipeline to spawn its event loop
    pub fn take_shield(&mut self) -> Shield {
        self.shield.take().expect("shield already taken")
    }
}

impl Drop for TestShield {
    fn drop(&mut self) {
        self.handle.deactivate();
    }
}

/// Start a shield on a stock device with blocking enabled
pub fn blocking_shield() -> TestShield {
    let shield = shield_with(StaticDevice::stock(), ShieldConfig::default(), PolicyStore::in_memory());
    shield.handle.set_block_all_enabled(true);
    shield
}

pub fn shield_with(device: StaticDevice, config: ShieldConfig, store: PolicyStore) -> TestShield {
    init_test_logging();

    let actions = Arc::new(RecordingActions::new());
    let feedback = Arc::new(RecordingFeedback::new(true));
    let hosts = HostBindings {
        actions: actions.clone(),
        feedback: feedback.clone(),
        device: Arc::new(device),
    };
    let shield = Shield::start(config, hosts, store);
    TestShield {
        handle: shield.handle(),
        shield: Some(shield),
        actions,
        feedback,
    }
}
