//! Enforcement Controller - turns signals into sequenced OS actions.
//!
//! | Signal | Plan |
//! |---|---|
//! | BypassAttempt, RestrictedScreen, RestrictedSearch | restrict: back, 100ms, home, feedback |
//! | DismissScreen | dismiss: back |
//! | ForegroundViolation | block: home, feedback, 200ms, terminate |
//!
//! Restrict plans share a 1.5s cool-down checked when the signal arrives.
//! Block plans coalesce per package and dismiss plans coalesce with each
//! other, so a burst of events for one screen queues a single sequence.
//! Feedback is deduplicated when it is about to be shown (see
//! [`queue::FEEDBACK_DEDUPE_WINDOW`]). The timing constants are fixed.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::classifier::rules::SILENT_BLOCK_PACKAGE;
use crate::classifier::Signal;
use crate::host::{ActionSink, FeedbackSink};
use crate::policy::PolicyState;

pub mod queue;

pub use queue::{ActionPlan, ActionQueue, ActionStep, RateLimitClock, FEEDBACK_DEDUPE_WINDOW};

/// Minimum time between two restrict sequences
pub const RESTRICT_COOLDOWN: Duration = Duration::from_millis(1500);

/// Delay between navigate-back and navigate-home when restricting
pub const BACK_TO_HOME_DELAY: Duration = Duration::from_millis(100);

/// Delay between navigate-home and terminate when blocking
pub const HOME_TO_TERMINATE_DELAY: Duration = Duration::from_millis(200);

pub const MSG_USAGE_RESTRICTED: &str = "Usage Restricted";
pub const MSG_SEARCH_RESTRICTED: &str = "Access to permissions is restricted.";
pub const MSG_APP_RESTRICTED: &str = "The App is restricted now";

/// Sequences enforcement actions on a single ordered queue
pub struct EnforcementController {
    queue: ActionQueue,
    clock: Arc<Mutex<RateLimitClock>>,
}

impl EnforcementController {
    /// Start the controller's worker. Must be called inside a Tokio runtime.
    pub fn new(actions: Arc<dyn ActionSink>, feedback: Arc<dyn FeedbackSink>) -> Self {
        let clock = Arc::new(Mutex::new(RateLimitClock::default()));
        let queue = ActionQueue::spawn(actions, feedback, Arc::clone(&clock));
        Self { queue, clock }
    }

    /// Plan and queue actions for every signal of one event, in order.
    ///
    /// Returns as soon as the plans are queued.
    #[instrument(name = "enforce", skip_all, fields(signal_count = signals.len()))]
    pub fn enforce(&self, signals: &[Signal], policy: &PolicyState) {
        for signal in signals {
            match signal {
                Signal::BypassAttempt | Signal::RestrictedScreen { .. } => {
                    self.restrict_access(MSG_USAGE_RESTRICTED, policy.feedback_enabled);
                }
                Signal::RestrictedSearch => {
                    self.restrict_access(MSG_SEARCH_RESTRICTED, policy.feedback_enabled);
                }
                Signal::DismissScreen => {
                    debug!("Dismissing screen");
                    self.queue.enqueue(
                        ActionPlan::new("dismiss")
                            .then(ActionStep::Back)
                            .coalesce_on("dismiss"),
                    );
                }
                Signal::ForegroundViolation { package_id } => {
                    self.block_app(package_id, policy.feedback_enabled);
                }
            }
        }
    }

    /// Back out of a restricted screen and return home, unless a restrict
    /// sequence started less than [`RESTRICT_COOLDOWN`] ago
    pub fn restrict_access(&self, message: &str, feedback_enabled: bool) {
        let now = Instant::now();
        let started = match self.clock.lock() {
            Ok(mut clock) => clock.try_enforce(now, RESTRICT_COOLDOWN),
            Err(poisoned) => poisoned.into_inner().try_enforce(now, RESTRICT_COOLDOWN),
        };
        if !started {
            debug!("Restrict debounced ({})", message);
            return;
        }

        info!("Restricting access: {}", message);
        let mut plan = ActionPlan::new("restrict")
            .then(ActionStep::Back)
            .then(ActionStep::Wait(BACK_TO_HOME_DELAY))
            .then(ActionStep::Home);
        if feedback_enabled {
            plan = plan.then(ActionStep::Feedback(message.to_string()));
        }
        self.queue.enqueue(plan);
    }

    /// Send the user home and terminate `package_id`, unless a block for
    /// the same package is already queued or running
    pub fn block_app(&self, package_id: &str, feedback_enabled: bool) {
        let mut plan = ActionPlan::new("block")
            .coalesce_on(format!("block:{}", package_id.to_lowercase()))
            .then(ActionStep::Home);
        if feedback_enabled && !package_id.eq_ignore_ascii_case(SILENT_BLOCK_PACKAGE) {
            plan = plan.then(ActionStep::Feedback(MSG_APP_RESTRICTED.to_string()));
        }
        let plan = plan
            .then(ActionStep::Wait(HOME_TO_TERMINATE_DELAY))
            .then(ActionStep::Terminate(package_id.to_string()));
        if self.queue.enqueue(plan) {
            info!("Blocking {}", package_id);
        }
    }

    /// Copy of the rate-limit timestamps
    pub fn clock(&self) -> RateLimitClock {
        match self.clock.lock() {
            Ok(clock) => clock.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Wait until everything queued so far has run
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Let queued plans finish, then stop the worker
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}
