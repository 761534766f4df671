//! Ordered action queue.
//!
//! One worker task drains a FIFO of [`ActionPlan`]s. A plan's steps,
//! including its fixed waits, run to completion before the next plan
//! starts, so the navigate/terminate steps of two enforcement sequences can
//! never interleave. Enqueueing never blocks the caller.
//!
//! A plan may carry a coalesce key. While a plan with that key is queued
//! or running, further plans with the same key are dropped, so a burst of
//! identical signals costs one sequence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::host::{ActionSink, FeedbackSink};

/// Same feedback message within this window is shown once
pub const FEEDBACK_DEDUPE_WINDOW: Duration = Duration::from_secs(5);

/// One step of an enforcement sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStep {
    Back,
    Home,
    Terminate(String),
    /// Show a pop-up, subject to the dedupe window
    Feedback(String),
    /// Fixed delay before the next step
    Wait(Duration),
}

/// Steps produced for one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPlan {
    /// Short label for logs ("restrict", "block", "dismiss")
    pub kind: &'static str,
    pub steps: Vec<ActionStep>,
    /// At most one pending plan per key
    pub coalesce_key: Option<String>,
}

impl ActionPlan {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            coalesce_key: None,
        }
    }

    pub fn then(mut self, step: ActionStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn coalesce_on(mut self, key: impl Into<String>) -> Self {
        self.coalesce_key = Some(key.into());
        self
    }
}

/// Process-lifetime timestamps that throttle enforcement and feedback
#[derive(Debug, Clone, Default)]
pub struct RateLimitClock {
    pub last_enforcement_at: Option<Instant>,
    pub last_feedback_at: Option<Instant>,
    pub last_feedback_message: Option<String>,
}

impl RateLimitClock {
    /// Record a restrict attempt at `now`; false when still cooling down
    pub fn try_enforce(&mut self, now: Instant, cooldown: Duration) -> bool {
        if let Some(last) = self.last_enforcement_at {
            if now.saturating_duration_since(last) < cooldown {
                return false;
            }
        }
        self.last_enforcement_at = Some(now);
        true
    }

    /// Record feedback at `now`; false when the same message is still
    /// inside the dedupe window
    pub fn try_feedback(&mut self, message: &str, now: Instant) -> bool {
        let repeated = self.last_feedback_message.as_deref() == Some(message)
            && self
                .last_feedback_at
                .is_some_and(|last| now.saturating_duration_since(last) < FEEDBACK_DEDUPE_WINDOW);
        if repeated {
            return false;
        }
        self.last_feedback_at = Some(now);
        self.last_feedback_message = Some(message.to_string());
        true
    }
}

enum Job {
    Run(ActionPlan),
    Flush(oneshot::Sender<()>),
}

type PendingKeys = Arc<Mutex<HashSet<String>>>;

fn lock_pending(pending: &PendingKeys) -> MutexGuard<'_, HashSet<String>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to the worker task
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: PendingKeys,
    worker: Option<JoinHandle<()>>,
}

impl ActionQueue {
    /// Spawn the worker on the current Tokio runtime
    pub fn spawn(
        actions: Arc<dyn ActionSink>,
        feedback: Arc<dyn FeedbackSink>,
        clock: Arc<Mutex<RateLimitClock>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = PendingKeys::default();
        let worker = Worker {
            actions,
            feedback,
            clock,
            pending: Arc::clone(&pending),
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            tx,
            pending,
            worker: Some(handle),
        }
    }

    /// Append a plan; returns immediately. Returns false when the plan was
    /// coalesced into a pending one or the worker is gone.
    pub fn enqueue(&self, plan: ActionPlan) -> bool {
        if let Some(key) = &plan.coalesce_key {
            if !lock_pending(&self.pending).insert(key.clone()) {
                debug!("{} plan for {} already pending - coalesced", plan.kind, key);
                return false;
            }
        }

        trace!("Queueing {} plan with {} steps", plan.kind, plan.steps.len());
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Job::Run(plan)) {
            if let Job::Run(ActionPlan {
                coalesce_key: Some(key),
                ..
            }) = job
            {
                lock_pending(&self.pending).remove(&key);
            }
            error!("Action worker is gone - enforcement plan dropped");
            return false;
        }
        true
    }

    /// Number of coalesce keys with a queued or running plan
    pub fn pending_keys(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Wait until every plan queued before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Close the queue and wait for already queued plans to finish
    pub async fn shutdown(mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        drop(self);
        if let Err(e) = handle.await {
            error!("Action worker ended abnormally: {}", e);
        }
    }
}

struct Worker {
    actions: Arc<dyn ActionSink>,
    feedback: Arc<dyn FeedbackSink>,
    clock: Arc<Mutex<RateLimitClock>>,
    pending: PendingKeys,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        debug!("Action worker started");
        while let Some(job) = rx.recv().await {
            match job {
                Job::Run(plan) => self.execute(plan).await,
                Job::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Action worker stopped");
    }

    async fn execute(&self, plan: ActionPlan) {
        debug!("Executing {} plan", plan.kind);
        let ActionPlan {
            steps,
            coalesce_key,
            ..
        } = plan;
        for step in steps {
            match step {
                ActionStep::Wait(delay) => tokio::time::sleep(delay).await,
                ActionStep::Back => {
                    if let Err(e) = self.actions.navigate_back() {
                        warn!("navigate-back failed: {:#}", e);
                    }
                }
                ActionStep::Home => {
                    if let Err(e) = self.actions.navigate_home() {
                        warn!("navigate-home failed: {:#}", e);
                    }
                }
                ActionStep::Terminate(package) => {
                    if let Err(e) = self.actions.terminate_process(&package) {
                        warn!("terminate {} failed: {:#}", package, e);
                    }
                }
                ActionStep::Feedback(message) => self.show_feedback(&message),
            }
        }
        if let Some(key) = coalesce_key {
            lock_pending(&self.pending).remove(&key);
        }
    }

    fn show_feedback(&self, message: &str) {
        let allowed = match self.clock.lock() {
            Ok(mut clock) => clock.try_feedback(message, Instant::now()),
            Err(poisoned) => poisoned.into_inner().try_feedback(message, Instant::now()),
        };
        if !allowed {
            debug!("Suppressing repeated feedback '{}'", message);
            return;
        }

        if let Err(e) = self.feedback.show_transient(message) {
            warn!("Pop-up '{}' failed: {:#}", message, e);
        }
        if self.feedback.notifications_permitted() {
            if let Err(e) = self.feedback.show_persistent(message) {
                warn!("Fallback notification '{}' failed: {:#}", message, e);
            }
        } else {
            trace!("Notification permission absent - no fallback notification");
        }
    }
}
