//! # beacon-node
//!
//! Proximity contact-tracing beacon for a single device.
//!
//! ## Running
//!
//! ```bash
//! # Development, mock radio with peers from the config file
//! cargo run --package beacon-node -- --config beacon.toml
//!
//! # Production (BlueZ radio)
//! ./beacon-node --production
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use beacon_core::{default_data_dir, storage, BeaconConfig, RecordLog};
use clap::Parser;
use tracing::{error, info};

use beacon_node::{build_node, logging, DeviceNode};

#[derive(Debug, Parser)]
#[command(name = "beacon-node", version, about = "Proximity contact-tracing beacon")]
struct Cli {
    /// Configuration file (TOML). Defaults to the platform config path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log JSON to rolling files as well as stdout.
    #[arg(long)]
    production: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Print the record log and exit.
    #[arg(long)]
    dump_records: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.production)?;

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => BeaconConfig::default_path()?,
    };
    let config = BeaconConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let data_dir = config.storage.data_dir.clone().unwrap_or_else(default_data_dir);

    if cli.dump_records {
        let log = RecordLog::open(data_dir.join(&config.storage.record_file))?;
        print!("{}", log.read_raw()?);
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "Starting beacon-node");
    storage::mount(&data_dir)?;

    #[cfg(feature = "bluetooth")]
    let (scanner, advertiser) = beacon_node::bluez::open(&config.identity.device_name).await?;

    #[cfg(not(feature = "bluetooth"))]
    let (scanner, advertiser) = {
        info!(peers = config.radio.mock_peers.len(), "Using mock radio");
        (
            beacon_core::MockScanner::fixed(config.radio.mock_peers.clone()).simulating_window(),
            beacon_core::MockAdvertiser::default(),
        )
    };

    let mut node = build_node(&config, &data_dir, scanner, advertiser).await?;
    run(&mut node, &config, cli.once).await
}

async fn run<S, A>(
    node: &mut DeviceNode<S, A>,
    config: &BeaconConfig,
    once: bool,
) -> anyhow::Result<()>
where
    S: beacon_core::PeerScanner,
    A: beacon_core::Advertiser,
{
    if once {
        let summary = node.run_cycle().await?;
        info!(?summary, "Single cycle complete");
        return Ok(());
    }

    node.run_until(config.scan.cycle_interval(), shutdown_signal()).await?;
    info!("beacon-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
