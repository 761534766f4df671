//! AppShield - app allow/deny policy engine
//!
//! Operator front end: policy editing, allowlist inspection, single-event
//! classification and event-log replay against a described device.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use appshield_core::allowlist::AllowlistResolver;
use appshield_core::classifier::Classifier;
use appshield_core::config::ShieldConfig;
use appshield_core::event::UiEvent;
use appshield_core::host::{DeviceIntrospection, StaticDevice};
use appshield_core::policy::{FileStore, PolicyState, PolicyStore};
use appshield_core::shield::{HostBindings, Shield};

mod console;
mod policy_cli;

use console::{ConsoleActions, ConsoleFeedback};

/// Trace modules
#[derive(Debug, Clone, ValueEnum)]
enum TraceModule {
    Allowlist,
    Classify,
    Enforce,
    Policy,
    All,
}

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "appshield",
    about = "App allow/deny policy engine driven by UI change events",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Enable tracing (comma-separated: allowlist,classify,enforce,policy,all)
    #[clap(long, value_delimiter = ',', global = true)]
    trace: Vec<TraceModule>,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Shield configuration file (default: platform config dir)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Policy store file (default: platform data dir)
    #[clap(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Show or change the stored policy
    Policy {
        #[clap(subcommand)]
        command: policy_cli::PolicyCommand,
    },

    /// Print the resolved allowlist for a device
    Allowlist {
        /// Device profile (YAML); a stock device when omitted
        #[clap(long)]
        device: Option<PathBuf>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Classify one JSON event read from stdin (no enforcement)
    Classify {
        #[clap(long)]
        device: Option<PathBuf>,

        /// Classify as if blocking were enabled
        #[clap(long)]
        force_block: bool,
    },

    /// Run a JSON-lines event log through classification and enforcement
    Replay {
        /// Event log, one JSON event per line
        events: PathBuf,

        #[clap(long)]
        device: Option<PathBuf>,

        /// Replay as if blocking were enabled; the stored policy is not changed
        #[clap(long)]
        force_block: bool,

        /// Pause between events in milliseconds
        #[clap(long, default_value = "0")]
        interval_ms: u64,

        /// Behave as if notification permission were missing
        #[clap(long)]
        no_notifications: bool,
    },

    /// List user-launchable installed apps of a device
    Installed {
        #[clap(long)]
        device: Option<PathBuf>,
    },

    /// Report how well the system catalog covers a device
    Compat {
        #[clap(long)]
        device: Option<PathBuf>,
    },
}

/// Initialize tracing with CLI flags
///
/// When --trace is set, enables JSON output for structured tracing.
fn initialize_tracing(log_level: &LogLevel, trace_modules: &[TraceModule]) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());

    for module in trace_modules {
        let directive = match module {
            TraceModule::Allowlist => "appshield_core::allowlist=trace",
            TraceModule::Classify => "appshield_core::classifier=trace",
            TraceModule::Enforce => "appshield_core::enforcement=trace",
            TraceModule::Policy => "appshield_core::policy=trace",
            TraceModule::All => "appshield_core=trace",
        };

        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }

    // Logs go to stderr; stdout carries command output
    if !trace_modules.is_empty() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();

        tracing::info!(trace_modules = ?trace_modules, "AppShield tracing enabled");
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, &cli.trace);

    let config = ShieldConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Command::Policy { command } => {
            let store = open_store(cli.store.as_deref(), &config)?;
            command.execute(&store)
        }
        Command::Allowlist { device, json } => {
            let store = open_store(cli.store.as_deref(), &config)?;
            allowlist_command(&config, &store.get(), load_device(device.as_deref())?, json)
        }
        Command::Classify {
            device,
            force_block,
        } => {
            let store = open_store(cli.store.as_deref(), &config)?;
            let mut policy = store.get();
            policy.block_all_enabled |= force_block;
            classify_command(&config, &policy, load_device(device.as_deref())?)
        }
        Command::Replay {
            events,
            device,
            force_block,
            interval_ms,
            no_notifications,
        } => {
            let store = open_store(cli.store.as_deref(), &config)?;
            let store = if force_block { overridden(&store.get()) } else { store };
            let device = load_device(device.as_deref())?;
            replay_command(
                config,
                store,
                device,
                &events,
                Duration::from_millis(interval_ms),
                !no_notifications,
            )
            .await
        }
        Command::Installed { device } => {
            let handle = start_quiet(config, load_device(device.as_deref())?);
            installed_command(&handle)
        }
        Command::Compat { device } => {
            let handle = start_quiet(config, load_device(device.as_deref())?);
            let report = handle.device_compatibility();
            handle.deactivate();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn open_store(explicit: Option<&Path>, config: &ShieldConfig) -> Result<PolicyStore> {
    let path = match explicit.or(config.store_path.as_deref()) {
        Some(path) => path.to_path_buf(),
        None => FileStore::default_path()
            .context("No platform data directory; pass --store to choose a policy file")?,
    };
    debug!("Using policy store {:?}", path);
    Ok(PolicyStore::open(Arc::new(FileStore::new(path))))
}

/// In-memory copy of `state` with blocking forced on
fn overridden(state: &PolicyState) -> PolicyStore {
    let store = PolicyStore::in_memory();
    store.set_custom_allowed(&state.custom_allowed);
    store.set_feedback_enabled(state.feedback_enabled);
    store.set_block_all(true);
    store
}

fn load_device(path: Option<&Path>) -> Result<Arc<dyn DeviceIntrospection>> {
    match path {
        Some(path) => Ok(Arc::new(StaticDevice::load(path)?)),
        None => {
            info!("No device profile given - using a stock device");
            Ok(Arc::new(StaticDevice::stock()))
        }
    }
}

/// A shield whose pipeline never runs, for device queries
fn start_quiet(
    config: ShieldConfig,
    device: Arc<dyn DeviceIntrospection>,
) -> appshield_core::ShieldHandle {
    let hosts = HostBindings {
        actions: Arc::new(ConsoleActions::default()),
        feedback: Arc::new(ConsoleFeedback::new(false)),
        device,
    };
    Shield::start(config, hosts, PolicyStore::in_memory()).handle()
}

#[derive(Tabled)]
struct AllowRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Source")]
    source: &'static str,
}

fn allowlist_command(
    config: &ShieldConfig,
    policy: &PolicyState,
    device: Arc<dyn DeviceIntrospection>,
    json: bool,
) -> Result<()> {
    let resolver = AllowlistResolver::new(device, config.identity.clone());
    let allow = resolver.resolve(&policy.custom_allowed);

    let mut rows: Vec<AllowRow> = allow
        .defaults()
        .packages()
        .into_iter()
        .map(|package| AllowRow {
            package,
            source: "default",
        })
        .collect();
    rows.extend(
        allow
            .custom_packages()
            .iter()
            .filter(|p| !allow.defaults().contains(p))
            .map(|package| AllowRow {
                package: package.clone(),
                source: "custom",
            }),
    );

    if json {
        let packages: Vec<&str> = rows.iter().map(|r| r.package.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{} allowed packages\n", rows.len());
    println!("{table}");
    Ok(())
}

fn classify_command(
    config: &ShieldConfig,
    policy: &PolicyState,
    device: Arc<dyn DeviceIntrospection>,
) -> Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read event from stdin")?;
    let event: UiEvent = serde_json::from_str(&input).context("Failed to parse event JSON")?;

    let allow = AllowlistResolver::new(device, config.identity.clone()).resolve(&policy.custom_allowed);
    let signals = Classifier::new(config).classify(&event, &allow, policy);
    println!("{}", serde_json::to_string_pretty(&signals)?);
    Ok(())
}

/// Parse a JSON-lines event log; blank lines and `#` comments are skipped
fn read_event_log(path: &Path) -> Result<Vec<UiEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log: {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid event", path.display(), index + 1))
        })
        .collect()
}

#[derive(Tabled)]
struct ReplayRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Signals")]
    signals: String,
}

async fn replay_command(
    config: ShieldConfig,
    store: PolicyStore,
    device: Arc<dyn DeviceIntrospection>,
    events_path: &Path,
    interval: Duration,
    notifications: bool,
) -> Result<()> {
    let events = read_event_log(events_path)?;
    info!("Replaying {} events from {:?}", events.len(), events_path);

    let actions = Arc::new(ConsoleActions::default());
    let hosts = HostBindings {
        actions: actions.clone(),
        feedback: Arc::new(ConsoleFeedback::new(notifications)),
        device,
    };
    let handle = Shield::start(config, hosts, store).handle();

    let mut rows = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        let signals = handle.handle_event(event);
        rows.push(ReplayRow {
            index: index + 1,
            package: event.package_id.clone().unwrap_or_else(|| "-".to_string()),
            kind: event.event_kind.to_string(),
            signals: if signals.is_empty() {
                "-".to_string()
            } else {
                signals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        });
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    handle.flush().await;
    handle.deactivate();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!();
    println!("{table}");
    println!(
        "{} events, {} with signals, {} OS actions",
        rows.len(),
        rows.iter().filter(|r| r.signals != "-").count(),
        actions.count()
    );
    Ok(())
}

#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "System")]
    system: bool,
}

fn installed_command(handle: &appshield_core::ShieldHandle) -> Result<()> {
    let rows: Vec<InstalledRow> = handle
        .get_installed_apps()
        .into_iter()
        .map(|p| InstalledRow {
            label: p.label.unwrap_or_default(),
            package: p.package_id,
            system: p.is_system,
        })
        .collect();
    handle.deactivate();

    if rows.is_empty() {
        println!("No launchable apps reported");
        return Ok(());
    }
    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}
