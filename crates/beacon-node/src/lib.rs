//! # beacon-node
//!
//! Device runtime for the proximity beacon.
//!
//! This library wires the `beacon-core` components to real collaborators:
//! - [`udp`] - UDP channel to the collector
//! - `bluez` - BlueZ radio (feature `bluetooth`)
//! - [`runner`] - the scan/log/uplink loop
//! - [`logging`] - tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::Path;

use anyhow::Context;
use beacon_core::{
    Advertiser, BeaconConfig, Clock, ContactLedger, IdentityManager, Outbox, PeerScanner,
    RecordLog, ReliableUplink, ScanCycle, SystemClock, UplinkSettings,
};
use rand::rngs::OsRng;

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod logging;
pub mod runner;
pub mod udp;

pub use runner::{CycleSummary, Node};
pub use udp::UdpChannel;

/// A node running on the operating system's clock, entropy and network.
pub type DeviceNode<S, A> = Node<S, A, OsRng, UdpChannel, SystemClock>;

/// Open the files under `data_dir`, connect the uplink, put the first token
/// on air and assemble the node.
///
/// `data_dir` must already be mounted.
///
/// # Errors
///
/// Fails if any persisted state cannot be loaded, the collector cannot be
/// resolved, or the first identity cannot be advertised.
pub async fn build_node<S, A>(
    config: &BeaconConfig,
    data_dir: &Path,
    scanner: S,
    advertiser: A,
) -> anyhow::Result<DeviceNode<S, A>>
where
    S: PeerScanner,
    A: Advertiser,
{
    let storage = &config.storage;

    let ledger = ContactLedger::open(
        data_dir.join(&storage.ledger_file),
        config.exposure.close_contact_rssi,
    )?;
    let log = RecordLog::open(data_dir.join(&storage.record_file))?;
    let outbox = Outbox::open(data_dir.join(&storage.outbox_file), storage.outbox_capacity)?;

    let channel = UdpChannel::connect(&config.uplink.collector, config.uplink.bind_port)
        .await
        .with_context(|| format!("connecting uplink to {}", config.uplink.collector))?;
    let uplink = ReliableUplink::new(channel, UplinkSettings::from_config(&config.uplink));

    let clock = SystemClock;
    let identity = IdentityManager::new(advertiser, OsRng, &config.identity, clock.now()).await?;
    let cycle = ScanCycle::new(scanner, identity, ledger, config)?;

    Ok(Node::new(cycle, uplink, log, outbox, clock))
}
