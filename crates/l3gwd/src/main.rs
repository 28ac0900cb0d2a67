//! l3gwd - L3 gateway control plane daemon
//!
//! Restores the device projection from the model store at startup, then
//! keeps it in line until shut down.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use l3gwd::{daemon, Backend, L3gwConfig, DEFAULT_CONFIG_PATH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// L3 gateway control plane daemon
#[derive(Parser, Debug)]
#[command(name = "l3gwd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Device backend, overriding the configuration file
    #[arg(short = 'b', long)]
    backend: Option<Backend>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("l3gwd exiting: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = L3gwConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(backend) = args.backend {
        config.daemon.backend = backend;
    }
    config.validate().context("invalid configuration")?;

    if args.check_config {
        info!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    info!("--- Starting l3gwd ---");
    info!("Backend: {}", config.daemon.backend);
    if config.uses_packet_filter() {
        info!(
            "Packet filter chain {} (parent {}), public interface {}",
            config.iptables.chain, config.iptables.parent_chain, config.iptables.public_interface
        );
    }
    if config.uses_zebra() {
        info!("zebra vty at {}:{}", config.zebra.host, config.zebra.port);
    }

    let reconciler = Arc::new(daemon::build_reconciler(&config)?);
    let report = reconciler
        .start()
        .await
        .context("device adapter initialization failed")?;
    if report.is_clean() {
        info!(
            "Restored {} subnets and {} routes",
            report.subnets, report.routes
        );
    } else {
        warn!(
            "Restored {} subnets and {} routes with {} failures",
            report.subnets, report.routes, report.failures
        );
    }

    let resync = config
        .resync_interval()
        .map(|interval| tokio::spawn(daemon::resync_loop(reconciler.clone(), interval)));

    info!("l3gwd ready");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(task) = resync {
        task.abort();
    }
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}
