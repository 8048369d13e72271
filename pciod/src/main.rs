//! # pciod
//!
//! Motor-control daemon for servo module groups.
//!
//! Without an action flag the daemon runs its control loop until SIGINT or
//! SIGTERM. With one of `--query`, `--set`, `--reset`, `--list`,
//! `--config-enable` or `--config-disable` it performs that action once
//! and exits.

use clap::{ArgGroup, Parser};
use pciod::config::{CliOverrides, DaemonConfig};
use pciod::daemon;
use pciod::error::{DaemonError, DaemonResult};
use pciod::oneshot::{self, Action, OutputOptions};
use pciod_common::config::LogLevel;
use pciod_common::group::BusLayout;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// pciod - servo module group control daemon
#[derive(Parser, Debug)]
#[command(name = "pciod")]
#[command(version)]
#[command(about = "Bridges shared-memory command/state channels to a servo module group")]
#[command(group(
    ArgGroup::new("action")
        .args(["query", "set", "reset", "list", "config_enable", "config_disable"])
        .multiple(false)
))]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bus and its modules, in group order (repeatable). Replaces `[[bus]]` tables.
    #[arg(short, long = "bus", value_name = "NET:ID[,ID...]")]
    buses: Vec<BusLayout>,

    /// Channel to read reference commands from.
    #[arg(long, value_name = "NAME")]
    cmd_channel: Option<String>,

    /// Channel to publish motor state on.
    #[arg(long, value_name = "NAME")]
    state_channel: Option<String>,

    /// Control loop frequency [Hz].
    #[arg(short, long, value_name = "HZ")]
    frequency: Option<f64>,

    /// Put the modules into full-current mode.
    #[arg(long)]
    full_current: bool,

    /// Home the modules before entering the loop.
    #[arg(long)]
    home: bool,

    /// Bus driver.
    #[arg(long, value_name = "NAME")]
    driver: Option<String>,

    /// CPU core to pin the loop thread to (`rt` feature).
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority (`rt` feature).
    #[arg(long)]
    rt_priority: Option<i32>,

    /// Print `state`, `config` or a parameter for every module.
    #[arg(short, long, value_name = "WHAT")]
    query: Option<String>,

    /// Write a parameter; give values with `--value`.
    #[arg(short, long, value_name = "PARAM", requires = "value")]
    set: Option<String>,

    /// Value for `--set`: one per module or one for all (repeatable).
    #[arg(long = "value", value_name = "V", allow_hyphen_values = true)]
    value: Vec<String>,

    /// Reset every module.
    #[arg(short, long)]
    reset: bool,

    /// List state, config and parameter codes.
    #[arg(short, long)]
    list: bool,

    /// Set a config flag on every module.
    #[arg(long, value_name = "FLAG")]
    config_enable: Option<String>,

    /// Clear a config flag on every module.
    #[arg(long, value_name = "FLAG")]
    config_disable: Option<String>,

    /// Verbose logging (-v DEBUG, -vv TRACE).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs and query results as JSON.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            command_channel: self.cmd_channel.clone(),
            state_channel: self.state_channel.clone(),
            frequency_hz: self.frequency,
            full_current: self.full_current,
            home: self.home,
            driver: self.driver.clone(),
            buses: self.buses.clone(),
            cpu_core: self.cpu_core,
            rt_priority: self.rt_priority,
        }
    }

    fn action(&self) -> DaemonResult<Option<Action>> {
        if let Some(ref what) = self.query {
            return Ok(Some(Action::Query(what.parse()?)));
        }
        if let Some(ref param) = self.set {
            return Action::set(param, &self.value).map(Some);
        }
        if self.reset {
            return Ok(Some(Action::Reset));
        }
        if self.list {
            return Ok(Some(Action::List));
        }
        if let Some(ref flag) = self.config_enable {
            return Action::config(flag, true).map(Some);
        }
        if let Some(ref flag) = self.config_disable {
            return Action::config(flag, false).map(Some);
        }
        if !self.value.is_empty() {
            return Err(DaemonError::Usage("--value needs --set".to_string()));
        }
        Ok(None)
    }
}

fn main() {
    let args = Args::parse();
    let action = args.action();

    // Offline actions need neither a config nor a bus.
    if let Ok(Some(action)) = &action {
        if !action.needs_bus() {
            setup_tracing(log_level(args.verbose, LogLevel::default()), args.json);
            exit_on_error(oneshot::run_offline(action, &mut std::io::stdout().lock()));
            return;
        }
    }

    let config = DaemonConfig::resolve(args.config.as_deref(), &args.overrides());
    let base = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(log_level(args.verbose, base), args.json);

    exit_on_error(
        config
            .map_err(DaemonError::from)
            .and_then(|config| run(&args, &config, action?)),
    );
}

fn exit_on_error(result: DaemonResult<()>) {
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(args: &Args, config: &DaemonConfig, action: Option<Action>) -> DaemonResult<()> {
    match action {
        Some(action) => run_action(args, config, &action),
        None => run_daemon(config),
    }
}

fn run_action(args: &Args, config: &DaemonConfig, action: &Action) -> DaemonResult<()> {
    let mut bus = daemon::open_bus(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let opts = OutputOptions {
        json: args.json,
        verbose: args.verbose > 0,
    };
    oneshot::run_action(&mut bus, action, &mut out, opts)?;
    out.flush()?;
    Ok(())
}

fn run_daemon(config: &DaemonConfig) -> DaemonResult<()> {
    info!("pciod v{} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })?;

    let stats = daemon::run(config, &shutdown)?;
    info!(
        cycles = stats.cycle_count,
        commands = stats.commands,
        forced_halts = stats.forced_halts,
        "pciod shutdown complete"
    );
    Ok(())
}

/// `-v` overrides the configured level.
fn log_level(verbose: u8, base: LogLevel) -> Level {
    match verbose {
        0 => base.as_directive().parse().unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn setup_tracing(level: Level, json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
