//! Radio collaborator boundary.
//!
//! The core never talks to a Bluetooth stack directly. It consumes two
//! capabilities:
//! - [`PeerScanner`] - run one discovery window and report what was heard
//! - [`Advertiser`] - put a token on air, or take it off
//!
//! Adapters for real hardware live in the device crate.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PeerObservation;

/// Radio-specific errors.
#[derive(Debug, Error)]
pub enum RadioError {
    /// No adapter is present or it could not be powered.
    #[error("no radio adapter available")]
    AdapterNotFound,

    /// The discovery window could not be completed.
    #[error("scan failed: {message}")]
    ScanFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// The advertisement payload could not be set or cleared.
    #[error("advertise failed: {message}")]
    AdvertiseFailed {
        /// Stack-provided detail.
        message: String,
    },
}

/// Result alias for radio operations.
pub type RadioResult<T> = std::result::Result<T, RadioError>;

/// Discovers nearby advertisers.
#[async_trait]
pub trait PeerScanner: Send {
    /// Listen for `window` and return every advertisement heard, in the order
    /// the stack reported them.
    async fn scan(&mut self, window: Duration) -> RadioResult<Vec<PeerObservation>>;
}

/// Broadcasts this device's token.
#[async_trait]
pub trait Advertiser: Send {
    /// Replace the advertised payload with `token`. When this returns `Ok`
    /// the previous token is no longer on air.
    async fn advertise(&mut self, token: &str) -> RadioResult<()>;

    /// Stop advertising entirely.
    async fn stop(&mut self) -> RadioResult<()>;
}
