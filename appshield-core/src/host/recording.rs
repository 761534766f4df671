//! In-process host doubles that record what they are asked to do.
//!
//! Used by the integration tests and by the CLI's dry-run replay, where
//! there is no real device to act on.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::time::Instant;

use super::{ActionSink, DeviceIntrospection, FeedbackSink, InstalledPackage};

/// One OS action as seen by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    NavigateBack,
    NavigateHome,
    Terminate(String),
}

impl RecordedAction {
    pub fn name(&self) -> &'static str {
        match self {
            RecordedAction::NavigateBack => "back",
            RecordedAction::NavigateHome => "home",
            RecordedAction::Terminate(_) => "terminate",
        }
    }
}

/// Action sink that appends every request to a timeline.
///
/// Individual action names ("back", "home", "terminate") can be made to
/// fail; failed requests are still recorded as attempted.
#[derive(Debug, Default)]
pub struct RecordingActions {
    timeline: Mutex<Vec<(Instant, RecordedAction)>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future request of this action name fail
    pub fn fail(&self, name: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(name);
        }
    }

    /// Actions in the order they were requested
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.timeline()
            .into_iter()
            .map(|(_, action)| action)
            .collect()
    }

    /// Actions with the (tokio) instant at which they were requested
    pub fn timeline(&self) -> Vec<(Instant, RecordedAction)> {
        self.timeline
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    fn record(&self, action: RecordedAction) -> Result<()> {
        let name = action.name();
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.push((Instant::now(), action));
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(name))
            .unwrap_or(false);
        if failing {
            return Err(anyhow!("{name} rejected by host"));
        }
        Ok(())
    }
}

impl ActionSink for RecordingActions {
    fn navigate_back(&self) -> Result<()> {
        self.record(RecordedAction::NavigateBack)
    }

    fn navigate_home(&self) -> Result<()> {
        self.record(RecordedAction::NavigateHome)
    }

    fn terminate_process(&self, package_id: &str) -> Result<()> {
        self.record(RecordedAction::Terminate(package_id.to_string()))
    }
}

/// Feedback sink that keeps every message it is asked to show
#[derive(Debug)]
pub struct RecordingFeedback {
    transient: Mutex<Vec<(Instant, String)>>,
    persistent: Mutex<Vec<String>>,
    notifications_permitted: bool,
}

impl Default for RecordingFeedback {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RecordingFeedback {
    pub fn new(notifications_permitted: bool) -> Self {
        Self {
            transient: Mutex::new(Vec::new()),
            persistent: Mutex::new(Vec::new()),
            notifications_permitted,
        }
    }

    pub fn transient(&self) -> Vec<String> {
        self.transient
            .lock()
            .map(|t| t.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    pub fn transient_timeline(&self) -> Vec<(Instant, String)> {
        self.transient.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn persistent(&self) -> Vec<String> {
        self.persistent.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn show_transient(&self, message: &str) -> Result<()> {
        if let Ok(mut transient) = self.transient.lock() {
            transient.push((Instant::now(), message.to_string()));
        }
        Ok(())
    }

    fn show_persistent(&self, message: &str) -> Result<()> {
        if let Ok(mut persistent) = self.persistent.lock() {
            persistent.push(message.to_string());
        }
        Ok(())
    }

    fn notifications_permitted(&self) -> bool {
        self.notifications_permitted
    }
}

/// Introspection provider whose every lookup fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableDevice;

impl DeviceIntrospection for UnavailableDevice {
    fn manufacturer(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn default_launcher(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn default_sms(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn call_handlers(&self) -> Result<Vec<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn contacts_handler(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn calendar_handler(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn clock_handler(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn settings_package(&self) -> Result<Option<String>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn is_installed(&self, _package_id: &str) -> Result<bool> {
        Err(anyhow!("package manager unavailable"))
    }

    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        Err(anyhow!("package manager unavailable"))
    }

    fn foreground_package(&self) -> Result<Option<String>> {
        Err(anyhow!("usage stats unavailable"))
    }
}
