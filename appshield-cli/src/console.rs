//! Console host sinks for replays: every OS action and pop-up is printed
//! to stdout with a wall-clock timestamp instead of being performed.

use anyhow::Result;
use appshield_core::host::{ActionSink, FeedbackSink};
use chrono::Local;
use std::sync::atomic::{AtomicUsize, Ordering};

fn stamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

#[derive(Debug, Default)]
pub struct ConsoleActions {
    count: AtomicUsize,
}

impl ConsoleActions {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn print(&self, what: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
        println!("[{}] action   {}", stamp(), what);
    }
}

impl ActionSink for ConsoleActions {
    fn navigate_back(&self) -> Result<()> {
        self.print("back");
        Ok(())
    }

    fn navigate_home(&self) -> Result<()> {
        self.print("home");
        Ok(())
    }

    fn terminate_process(&self, package_id: &str) -> Result<()> {
        self.print(&format!("terminate {package_id}"));
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConsoleFeedback {
    notifications: bool,
}

impl ConsoleFeedback {
    pub fn new(notifications: bool) -> Self {
        Self { notifications }
    }
}

impl FeedbackSink for ConsoleFeedback {
    fn show_transient(&self, message: &str) -> Result<()> {
        println!("[{}] popup    {}", stamp(), message);
        Ok(())
    }

    fn show_persistent(&self, message: &str) -> Result<()> {
        println!("[{}] notify   {}", stamp(), message);
        Ok(())
    }

    fn notifications_permitted(&self) -> bool {
        self.notifications
    }
}
