//! # beacon-core
//!
//! Core logic for the proximity contact-tracing beacon.
//!
//! This crate provides:
//! - A rotating, unlinkable broadcast identity
//! - Filtering of observed advertisements down to peers of this beacon family
//! - A durable per-peer contact ledger with close-contact accounting
//! - Duration-based exposure evaluation
//! - Acknowledged delivery of records over an unreliable datagram channel
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`identity`] - Token generation and rotation
//! - [`filter`] - Protocol-membership filter for observations
//! - [`ledger`] - Persistent first-seen and close-contact state per peer
//! - [`exposure`] - Turns an observation and its history into a record
//! - [`scan`] - One discovery pass tying the above together
//! - [`uplink`] - Stop-and-wait delivery to the collector
//! - [`record`] / [`record_log`] / [`outbox`] - Record format and local files
//! - [`radio`] / [`clock`] - Collaborator traits for hardware and time
//! - [`config`] - Configuration loading, saving, and validation
//! - [`storage`] - Data directory mount and atomic writes
//! - [`wait`] - Deadline-bounded polling
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod exposure;
pub mod filter;
pub mod identity;
pub mod ledger;
pub mod mock;
pub mod outbox;
pub mod radio;
pub mod record;
pub mod record_log;
pub mod scan;
pub mod storage;
pub mod types;
pub mod uplink;
pub mod wait;

// Re-export primary types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{
    BeaconConfig, ConfigError, ConfigResult, ExposureConfig, IdentityConfig, RadioConfig,
    ScanConfig, StorageConfig, UplinkConfig,
};
pub use error::{BeaconError, Result};
pub use exposure::ExposureEvaluator;
pub use filter::PeerFilter;
pub use identity::{IdentityError, IdentityManager};
pub use ledger::{ContactLedger, ContactRecord, LedgerError, LedgerResult, ProximityTransition};
pub use mock::{MockAdvertiser, MockScanner};
pub use outbox::Outbox;
pub use radio::{Advertiser, PeerScanner, RadioError, RadioResult};
pub use record::{ExposureStatus, OutputRecord, ParseRecordError, RECORD_HEADER};
pub use record_log::RecordLog;
pub use scan::ScanCycle;
pub use storage::{default_data_dir, mount, write_atomic, StorageError, StorageReport, StorageResult};
pub use types::{elapsed_secs, PeerObservation, SelfIdentity, Timestamp};
pub use uplink::{DatagramChannel, Delivery, ReliableUplink, UplinkSettings};
pub use wait::{poll_until, Deadline};
