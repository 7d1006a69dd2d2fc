//! Shared value types.
//!
//! Most types live next to the component that owns them (`ContactRecord` in
//! [`ledger`](crate::ledger), `OutputRecord` in [`record`](crate::record)).

use serde::{Deserialize, Serialize};

/// Unix time in whole seconds.
pub type Timestamp = u64;

/// Seconds elapsed from `earlier` to `later`, saturating at zero if the
/// clock stepped backwards between the two readings.
#[inline]
#[must_use]
pub const fn elapsed_secs(earlier: Timestamp, later: Timestamp) -> u64 {
    later.saturating_sub(earlier)
}

/// One advertisement seen during a scan window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerObservation {
    /// Radio address of the advertiser (opaque to the core).
    pub address: String,

    /// Received signal strength in dBm.
    pub signal_strength: i16,

    /// Token carried in the advertisement payload.
    pub advertised_token: String,
}

impl PeerObservation {
    /// Build an observation.
    pub fn new(
        address: impl Into<String>,
        signal_strength: i16,
        advertised_token: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            signal_strength,
            advertised_token: advertised_token.into(),
        }
    }
}

/// The identifier this device is currently broadcasting.
///
/// Replaced wholesale on every rotation; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    /// Broadcast token (marker followed by the random suffix).
    pub token: String,

    /// When the token was generated.
    pub generated_at: Timestamp,
}
