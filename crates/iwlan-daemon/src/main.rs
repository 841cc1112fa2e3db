//! IWLAN Daemon
//!
//! Hosts the tunnel dispatcher for a set of slots, and offers offline checks
//! of error policy documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use iwlan_core::config::{ServiceConfig, load_config};
use iwlan_core::iwlan_error::ErrorKind;
use iwlan_core::policy::{DefaultPolicies, schema::parse_document};
use iwlan_core::{IwlanError, PolicyStore, SystemClock};
use iwlan_daemon::dispatch::{CarrierConfig, Dispatcher, NetworkId, NetworkUpdate, Transport};
use iwlan_daemon::ledger::RetryLedger;
use iwlan_daemon::registry::SlotId;
use iwlan_daemon::tunnel::LoopbackBackend;

#[derive(Parser, Debug)]
#[command(name = "iwlan-daemon")]
#[command(version, about = "IWLAN daemon - per-APN tunnel lifecycle and retry policies")]
struct Args {
    /// Config file (JSON, or TOML by extension)
    #[arg(long, global = true, env = "IWLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, global = true, env = "IWLAN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, global = true, env = "IWLAN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher with the loopback backend until Ctrl+C
    Run {
        /// Number of slots to host
        #[arg(long, default_value_t = 1)]
        slots: u32,
    },
    /// Parse an error policy document and report the result
    Validate {
        file: PathBuf,
    },
    /// Print the retry schedule an error follows
    Schedule {
        #[arg(long)]
        apn: String,

        /// IKE notify code, or an error name such as `IO_EXCEPTION`
        #[arg(long, value_parser = parse_error)]
        error: IwlanError,

        /// Carrier policy document layered over the defaults
        #[arg(long)]
        carrier: Option<PathBuf>,

        #[arg(long, default_value_t = 5)]
        attempts: u32,
    },
}

const NAMED_KINDS: &[ErrorKind] = &[
    ErrorKind::IkeIoError,
    ErrorKind::IkeGenericError,
    ErrorKind::ServerSelectionFailed,
    ErrorKind::TunnelTransformFailed,
    ErrorKind::SimNotReady,
    ErrorKind::SessionClosedBeforeChildOpened,
    ErrorKind::NetworkLost,
    ErrorKind::TunnelNotFound,
    ErrorKind::AddressOnlyV4,
    ErrorKind::AddressOnlyV6,
    ErrorKind::InitTimeout,
    ErrorKind::MobilityTimeout,
    ErrorKind::DpdTimeout,
];

/// Accepts an IKE notify code, an error kind name or its generic policy token.
fn parse_error(raw: &str) -> Result<IwlanError, String> {
    if let Ok(code) = raw.parse::<u32>() {
        return Ok(IwlanError::ike_protocol(code));
    }
    NAMED_KINDS
        .iter()
        .map(|kind| IwlanError::new(*kind))
        .find(|err| err.kind().name() == raw || err.generic_detail() == Some(raw))
        .ok_or_else(|| format!("unknown error: {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    iwlan_core::tracing_init::init_tracing(
        &iwlan_core::tracing_init::default_filter(&config.log_level),
        args.log_json,
    );

    match args.command {
        Command::Run { slots } => run(config, slots).await,
        Command::Validate { file } => validate(&file),
        Command::Schedule {
            apn,
            error,
            carrier,
            attempts,
        } => schedule(&config, &apn, &error, carrier.as_deref(), attempts),
    }
}

fn load_defaults(config: &ServiceConfig) -> anyhow::Result<DefaultPolicies> {
    match &config.policy.default_policy_path {
        Some(path) => DefaultPolicies::load(path)
            .with_context(|| format!("loading default policies from {}", path.display())),
        None => Ok(DefaultPolicies::bundled()?),
    }
}

async fn run(config: ServiceConfig, slots: u32) -> anyhow::Result<()> {
    let defaults = Arc::new(load_defaults(&config)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        slots,
        queue_capacity = config.dispatcher.queue_capacity,
        "Starting iwlan-daemon"
    );

    let (dispatcher, worker) = Dispatcher::spawn(
        config,
        defaults,
        Arc::new(LoopbackBackend::new()),
        Arc::new(SystemClock),
    );

    for index in 0..slots {
        let handle = dispatcher.add_slot(SlotId::new(index)).await?;
        handle.carrier_config_changed(CarrierConfig::default()).await?;
    }
    dispatcher
        .network_changed(NetworkUpdate::Connectivity {
            connected: true,
            transport: Transport::Wifi,
            network: Some(NetworkId(1)),
        })
        .await?;

    info!("Dispatcher ready");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C shutdown signal");

    match dispatcher.dump().await {
        Ok(dump) => info!(dump = %serde_json::to_string(&dump)?, "final state"),
        Err(e) => error!(error = %e, "dump failed"),
    }
    for slot in dispatcher.registry().slots() {
        dispatcher.remove_slot(slot).await?;
    }
    dispatcher.shutdown().await?;
    worker.await?;

    info!("Daemon stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn validate(file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let map = parse_document(&raw).with_context(|| format!("{} rejected", file.display()))?;

    let mut apns: Vec<_> = map.iter().collect();
    apns.sort_by(|a, b| a.0.cmp(b.0));
    for (apn, policies) in apns {
        println!("{apn}:");
        for policy in policies {
            println!("  {policy}");
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn schedule(
    config: &ServiceConfig,
    apn: &str,
    error: &IwlanError,
    carrier: Option<&Path>,
    attempts: u32,
) -> anyhow::Result<()> {
    let store = PolicyStore::with_defaults(Arc::new(load_defaults(config)?));
    let mut ledger = RetryLedger::new(store, Arc::new(SystemClock), &config.stats);

    if let Some(path) = carrier {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let update = ledger.on_carrier_config_changed(0, Some(&raw));
        if !update.reload.is_applied() {
            bail!("{} not applied: {:?}", path.display(), update.reload);
        }
    }

    println!("{apn} {error}:");
    for attempt in 1..=attempts {
        match ledger.report_error(apn, error) {
            Some(secs) => println!("  attempt {attempt}: retry in {secs}s"),
            None => println!("  attempt {attempt}: no retry"),
        }
    }
    println!("  cause: {}", ledger.data_fail_cause(apn));
    Ok(())
}
