//! The running pipeline: event channel → classifier → enforcement.
//!
//! [`Shield`] owns the receiving end of the bounded event channel and is
//! consumed by [`Shield::run`]. [`ShieldHandle`] is the cheap, cloneable
//! configuration surface handed to everything else; it is also what the
//! process registry stores.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::allowlist::{AllowSet, AllowlistResolver, DefaultAllowlist, VendorFamily, SYSTEM_CATALOG};
use crate::classifier::{Classifier, Signal};
use crate::config::ShieldConfig;
use crate::enforcement::EnforcementController;
use crate::event::{UiEvent, UiNode};
use crate::host::{ActionSink, DeviceIntrospection, FeedbackSink, InstalledPackage};
use crate::policy::{PolicyState, PolicyStore};

pub mod registry;

/// Host collaborators the shield is wired to
#[derive(Clone)]
pub struct HostBindings {
    pub actions: Arc<dyn ActionSink>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub device: Arc<dyn DeviceIntrospection>,
}

/// Device compatibility report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCompatibility {
    pub manufacturer: Option<String>,
    pub vendor: VendorFamily,
    /// Catalog has entries specific to this vendor family
    pub vendor_specific: bool,
    pub vendor_catalog_entries: usize,
    pub default_allowed_count: usize,
}

pub(crate) struct ShieldInner {
    config: ShieldConfig,
    store: PolicyStore,
    device: Arc<dyn DeviceIntrospection>,
    resolver: AllowlistResolver,
    classifier: Classifier,
    controller: EnforcementController,
    defaults: RwLock<Arc<DefaultAllowlist>>,
    events: mpsc::Sender<UiEvent>,
    active: AtomicBool,
    stop: Notify,
}

/// Configuration and control surface of a running shield
#[derive(Clone)]
pub struct ShieldHandle {
    pub(crate) inner: Arc<ShieldInner>,
}

/// The event pipeline
pub struct Shield {
    handle: ShieldHandle,
    events: mpsc::Receiver<UiEvent>,
}

impl Shield {
    /// Wire the pipeline, resolve the default allowlist and register the
    /// handle. Must be called inside a Tokio runtime.
    pub fn start(config: ShieldConfig, hosts: HostBindings, store: PolicyStore) -> Self {
        let resolver = AllowlistResolver::new(Arc::clone(&hosts.device), config.identity.clone());
        let defaults = resolver.resolve_defaults();
        let classifier = Classifier::new(&config);
        let controller = EnforcementController::new(hosts.actions, hosts.feedback);
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));

        let inner = ShieldInner {
            config,
            store,
            device: hosts.device,
            resolver,
            classifier,
            controller,
            defaults: RwLock::new(Arc::new(defaults)),
            events: tx,
            active: AtomicBool::new(true),
            stop: Notify::new(),
        };
        let handle = ShieldHandle {
            inner: Arc::new(inner),
        };
        registry::register(&handle);

        let policy = handle.policy();
        info!(
            "Shield started for {} (blocking {}, {} custom allowed)",
            handle.inner.config.identity.package_id,
            if policy.block_all_enabled { "on" } else { "off" },
            policy.custom_allowed.len()
        );

        Self { handle, events: rx }
    }

    pub fn handle(&self) -> ShieldHandle {
        self.handle.clone()
    }

    /// Drain the event channel until deactivated, classifying and enforcing
    /// each event in arrival order
    pub async fn run(mut self) {
        debug!("Event loop started");
        loop {
            tokio::select! {
                _ = self.handle.inner.stop.notified() => break,
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle.handle_event(&event);
                    }
                    None => break,
                },
            }
        }

        self.handle.inner.active.store(false, Ordering::SeqCst);
        self.handle.inner.controller.flush().await;
        registry::deregister(&self.handle);
        info!("Event loop stopped");
    }
}

impl ShieldHandle {
    /// The registered shield, if one is running
    pub fn current() -> Option<Self> {
        registry::current()
    }

    /// Queue an event for the event loop. Drops it with a warning when the
    /// channel is full or the shield is no longer active.
    pub fn submit_event(&self, event: UiEvent) -> bool {
        if !self.is_active() {
            debug!("Shield inactive - event dropped");
            return false;
        }
        match self.inner.events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Event queue full - dropping {} event from {:?}",
                    event.event_kind, event.package_id
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Event loop has stopped - event dropped");
                false
            }
        }
    }

    /// Classify and enforce one event on the calling task
    pub fn handle_event(&self, event: &UiEvent) -> Vec<Signal> {
        let tree = event.source_node.as_ref().map(|node| node as &dyn UiNode);
        self.handle_event_with_tree(event, tree)
    }

    /// Like [`Self::handle_event`] with a host-owned tree borrowed for the
    /// duration of the call
    pub fn handle_event_with_tree(&self, event: &UiEvent, tree: Option<&dyn UiNode>) -> Vec<Signal> {
        if !self.is_active() {
            return Vec::new();
        }
        let policy = self.inner.store.snapshot();
        let allow = self.allow_set(&policy);
        let signals = self
            .inner
            .classifier
            .classify_with_tree(event, tree, &allow, &policy);
        if !signals.is_empty() {
            self.inner.controller.enforce(&signals, &policy);
        }
        signals
    }

    /// Cached device defaults plus the current custom list
    pub fn allow_set(&self, policy: &PolicyState) -> AllowSet {
        AllowSet::new(self.defaults(), policy.custom_allowed.clone())
    }

    fn defaults(&self) -> Arc<DefaultAllowlist> {
        match self.inner.defaults.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn policy(&self) -> PolicyState {
        self.inner.store.get()
    }

    pub fn store(&self) -> &PolicyStore {
        &self.inner.store
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.inner.config
    }

    pub fn set_block_all_enabled(&self, enabled: bool) {
        self.inner.store.set_block_all(enabled);
    }

    pub fn set_custom_allowed_apps<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.store.set_custom_allowed(packages);
    }

    pub fn set_feedback_enabled(&self, enabled: bool) {
        self.inner.store.set_feedback_enabled(enabled);
    }

    pub fn get_custom_allowed_apps(&self) -> BTreeSet<String> {
        self.inner.store.snapshot().custom_allowed.clone()
    }

    pub fn is_feedback_enabled(&self) -> bool {
        self.inner.store.snapshot().feedback_enabled
    }

    /// Sorted default (non-custom) allowed packages
    pub fn get_default_allowed_apps(&self) -> Vec<String> {
        self.defaults().packages()
    }

    /// Re-run device discovery and swap in the new default allowlist
    pub fn force_reinitialize_allowlist(&self) {
        let defaults = Arc::new(self.inner.resolver.resolve_defaults());
        match self.inner.defaults.write() {
            Ok(mut guard) => *guard = defaults,
            Err(poisoned) => *poisoned.into_inner() = defaults,
        }
        info!("Default allowlist reinitialized");
    }

    /// Blocking is enabled and this shield is the running one
    pub fn is_blocking_active(&self) -> bool {
        self.inner.store.snapshot().block_all_enabled
            && self.is_active()
            && registry::is_registered(self)
    }

    /// Launchable installed packages other than the enforcing app, sorted
    /// by label. Empty when the device cannot be queried.
    pub fn get_installed_apps(&self) -> Vec<InstalledPackage> {
        let mut packages = match self.inner.device.installed_packages() {
            Ok(packages) => packages,
            Err(e) => {
                warn!("Could not list installed packages: {:#}", e);
                return Vec::new();
            }
        };
        let self_package = &self.inner.config.identity.package_id;
        packages.retain(|p| p.launchable && !p.package_id.eq_ignore_ascii_case(self_package));
        packages.sort_by_cached_key(|p| {
            p.label
                .as_deref()
                .unwrap_or(&p.package_id)
                .to_lowercase()
        });
        packages
    }

    pub fn device_compatibility(&self) -> DeviceCompatibility {
        let defaults = self.defaults();
        let manufacturer = defaults.manufacturer().map(str::to_string);
        let vendor = defaults.vendor().unwrap_or(VendorFamily::Other);
        let vendor_catalog_entries = SYSTEM_CATALOG.family(vendor).len();
        DeviceCompatibility {
            manufacturer,
            vendor,
            vendor_specific: vendor_catalog_entries > 0,
            vendor_catalog_entries,
            default_allowed_count: defaults.len(),
        }
    }

    /// Block whatever is in the foreground right now, if it is not allowed.
    ///
    /// Returns the package that was blocked.
    pub fn block_current_app(&self) -> Option<String> {
        let policy = self.inner.store.snapshot();
        if !policy.block_all_enabled || !self.is_active() {
            debug!("Blocking inactive - not checking foreground app");
            return None;
        }

        let package = match self.inner.device.foreground_package() {
            Ok(Some(package)) if !package.trim().is_empty() => package,
            Ok(_) => {
                debug!("No foreground package reported");
                return None;
            }
            Err(e) => {
                warn!("Foreground package lookup failed: {:#}", e);
                return None;
            }
        };

        let allow = self.allow_set(&policy);
        if !self.inner.classifier.is_violation(&package, &allow) {
            debug!("Foreground package {} is allowed", package);
            return None;
        }
        self.inner
            .controller
            .block_app(&package, policy.feedback_enabled);
        Some(package)
    }

    /// Stop handling events and leave the registry
    pub fn deactivate(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("Shield deactivated");
        }
        self.inner.stop.notify_one();
        registry::deregister(self);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every enforcement action queued so far has run
    pub async fn flush(&self) {
        self.inner.controller.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::host::{RecordedAction, RecordingActions, RecordingFeedback, StaticDevice};
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn start(device: StaticDevice) -> (Shield, Arc<RecordingActions>) {
        let actions = Arc::new(RecordingActions::new());
        let hosts = HostBindings {
            actions: actions.clone(),
            feedback: Arc::new(RecordingFeedback::default()),
            device: Arc::new(device),
        };
        let shield = Shield::start(ShieldConfig::default(), hosts, PolicyStore::in_memory());
        (shield, actions)
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_start_registers_and_deactivate_deregisters() {
        let (shield, _) = start(StaticDevice::stock());
        let handle = shield.handle();
        assert!(registry::is_registered(&handle));
        assert!(!handle.is_blocking_active());

        handle.set_block_all_enabled(true);
        assert!(handle.is_blocking_active());

        handle.deactivate();
        assert!(ShieldHandle::current().is_none());
        assert!(!handle.is_blocking_active());
        assert!(!handle.submit_event(UiEvent::new("com.some.game", EventKind::WindowStateChanged)));
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_custom_list_applies_to_next_event() {
        let (shield, actions) = start(StaticDevice::stock());
        let handle = shield.handle();
        handle.set_block_all_enabled(true);

        let event = UiEvent::new("com.whatsapp", EventKind::WindowStateChanged);
        assert_eq!(handle.handle_event(&event).len(), 1);

        handle.set_custom_allowed_apps(["com.WhatsApp"]);
        assert!(handle.handle_event(&event).is_empty());
        handle.flush().await;
        assert_eq!(actions.actions().len(), 2);
        handle.deactivate();
    }

    /// Device whose profile can be swapped while the shield runs
    struct SwappableDevice(std::sync::Mutex<StaticDevice>);

    impl SwappableDevice {
        fn profile(&self) -> StaticDevice {
            self.0.lock().unwrap().clone()
        }
    }

    impl DeviceIntrospection for SwappableDevice {
        fn manufacturer(&self) -> anyhow::Result<Option<String>> {
            self.profile().manufacturer()
        }
        fn default_launcher(&self) -> anyhow::Result<Option<String>> {
            self.profile().default_launcher()
        }
        fn default_sms(&self) -> anyhow::Result<Option<String>> {
            self.profile().default_sms()
        }
        fn call_handlers(&self) -> anyhow::Result<Vec<String>> {
            self.profile().call_handlers()
        }
        fn contacts_handler(&self) -> anyhow::Result<Option<String>> {
            self.profile().contacts_handler()
        }
        fn calendar_handler(&self) -> anyhow::Result<Option<String>> {
            self.profile().calendar_handler()
        }
        fn clock_handler(&self) -> anyhow::Result<Option<String>> {
            self.profile().clock_handler()
        }
        fn settings_package(&self) -> anyhow::Result<Option<String>> {
            self.profile().settings_package()
        }
        fn is_installed(&self, package_id: &str) -> anyhow::Result<bool> {
            self.profile().is_installed(package_id)
        }
        fn installed_packages(&self) -> anyhow::Result<Vec<InstalledPackage>> {
            self.profile().installed_packages()
        }
        fn foreground_package(&self) -> anyhow::Result<Option<String>> {
            self.profile().foreground_package()
        }
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_force_reinitialize_picks_up_new_launcher() {
        let device = Arc::new(SwappableDevice(std::sync::Mutex::new(StaticDevice::stock())));
        let hosts = HostBindings {
            actions: Arc::new(RecordingActions::new()),
            feedback: Arc::new(RecordingFeedback::default()),
            device: device.clone(),
        };
        let handle = Shield::start(ShieldConfig::default(), hosts, PolicyStore::in_memory()).handle();
        let launcher = "com.example.launcher".to_string();
        assert!(!handle.get_default_allowed_apps().contains(&launcher));

        device.0.lock().unwrap().launcher = Some(launcher.clone());
        // Discovery is cached until reinitialized
        assert!(!handle.get_default_allowed_apps().contains(&launcher));

        handle.force_reinitialize_allowlist();
        assert!(handle.get_default_allowed_apps().contains(&launcher));
        handle.deactivate();
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_second_shield_replaces_first_in_registry() {
        let (first, _) = start(StaticDevice::stock());
        let (second, _) = start(StaticDevice::stock());
        let (first, second) = (first.handle(), second.handle());

        assert!(!registry::is_registered(&first));
        assert!(registry::is_registered(&second));

        // Deactivating a stale shield leaves the current one registered
        first.deactivate();
        assert!(registry::is_registered(&second));
        second.deactivate();
        assert!(ShieldHandle::current().is_none());
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_block_current_app() {
        let mut device = StaticDevice::stock();
        device.foreground = Some("com.some.game".to_string());
        let (shield, actions) = start(device);
        let handle = shield.handle();

        assert_eq!(handle.block_current_app(), None);

        handle.set_block_all_enabled(true);
        assert_eq!(handle.block_current_app(), Some("com.some.game".to_string()));
        handle.flush().await;
        assert_eq!(
            actions.actions(),
            vec![
                RecordedAction::NavigateHome,
                RecordedAction::Terminate("com.some.game".to_string())
            ]
        );

        handle.set_custom_allowed_apps(["com.some.game"]);
        assert_eq!(handle.block_current_app(), None);
        handle.deactivate();
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_installed_apps_and_compatibility() {
        let mut device = StaticDevice::stock().with_installed(InstalledPackage {
            package_id: "com.zeta.notes".to_string(),
            label: Some("Alpha Notes".to_string()),
            is_system: false,
            launchable: true,
        });
        device.manufacturer = Some("Xiaomi".to_string());
        let (shield, _) = start(device);
        let handle = shield.handle();

        let installed = handle.get_installed_apps();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].package_id, "com.zeta.notes");

        let report = handle.device_compatibility();
        assert_eq!(report.vendor, VendorFamily::Xiaomi);
        assert!(report.vendor_specific);
        assert_eq!(report.default_allowed_count, handle.get_default_allowed_apps().len());
        handle.deactivate();
    }
}
