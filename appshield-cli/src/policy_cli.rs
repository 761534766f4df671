//! Policy CLI commands
//!
//! Reads and writes the durable policy store: show, enable, disable, allow, feedback

use anyhow::{bail, Result};
use appshield_core::policy::{normalize_packages, PolicyStore};
use clap::Parser;

#[derive(Parser, Debug)]
pub enum PolicyCommand {
    /// Show the stored policy
    Show {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Turn blocking on
    Enable,

    /// Turn blocking off
    Disable,

    /// Edit the custom allowlist
    Allow {
        /// Package ids to add
        packages: Vec<String>,

        /// Remove the given packages instead of adding them
        #[clap(long, conflicts_with = "clear")]
        remove: bool,

        /// Empty the custom allowlist
        #[clap(long)]
        clear: bool,
    },

    /// Turn pop-ups and notifications on or off
    Feedback {
        #[clap(value_enum)]
        state: Toggle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl PolicyCommand {
    /// Execute the policy command
    pub fn execute(&self, store: &PolicyStore) -> Result<()> {
        match self {
            PolicyCommand::Show { json } => show(store, *json),
            PolicyCommand::Enable => {
                store.set_block_all(true);
                println!("Blocking enabled");
                Ok(())
            }
            PolicyCommand::Disable => {
                store.set_block_all(false);
                println!("Blocking disabled");
                Ok(())
            }
            PolicyCommand::Allow {
                packages,
                remove,
                clear,
            } => allow(store, packages, *remove, *clear),
            PolicyCommand::Feedback { state } => {
                store.set_feedback_enabled(*state == Toggle::On);
                println!(
                    "Feedback {}",
                    if *state == Toggle::On { "enabled" } else { "disabled" }
                );
                Ok(())
            }
        }
    }
}

fn show(store: &PolicyStore, json: bool) -> Result<()> {
    let state = store.get();
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Blocking:  {}", if state.block_all_enabled { "on" } else { "off" });
    println!("Feedback:  {}", if state.feedback_enabled { "on" } else { "off" });
    if state.custom_allowed.is_empty() {
        println!("Custom allowed apps: none");
    } else {
        println!("Custom allowed apps ({}):", state.custom_allowed.len());
        for package in &state.custom_allowed {
            println!("  {package}");
        }
    }
    Ok(())
}

fn allow(store: &PolicyStore, packages: &[String], remove: bool, clear: bool) -> Result<()> {
    if clear {
        store.set_custom_allowed(Vec::<String>::new());
        println!("Custom allowlist cleared");
        return Ok(());
    }

    let requested = normalize_packages(packages);
    if requested.is_empty() {
        bail!("No package ids given (use --clear to empty the list)");
    }

    let mut custom = store.get().custom_allowed;
    if remove {
        custom.retain(|p| !requested.contains(p));
    } else {
        custom.extend(requested);
    }
    let count = custom.len();
    store.set_custom_allowed(custom);
    println!("Custom allowlist now has {count} packages");
    Ok(())
}
