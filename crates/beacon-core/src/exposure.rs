//! Exposure decision for a single observation.

use tracing::warn;

use crate::config::ExposureConfig;
use crate::ledger::{ContactLedger, LedgerResult};
use crate::record::{ExposureStatus, OutputRecord};
use crate::types::{elapsed_secs, PeerObservation, Timestamp};

/// Turns an observation plus ledger history into an [`OutputRecord`].
///
/// The verdict is purely duration based: a peer is an exposure once its
/// cumulative close-contact time reaches the threshold. A single strong
/// reading is not enough.
#[derive(Debug, Clone, Copy)]
pub struct ExposureEvaluator {
    exposure_duration_secs: u64,
}

impl ExposureEvaluator {
    /// Evaluator with the given exposure threshold in seconds.
    #[must_use]
    pub const fn new(exposure_duration_secs: u64) -> Self {
        Self {
            exposure_duration_secs,
        }
    }

    /// Evaluator configured from [`ExposureConfig`].
    #[must_use]
    pub const fn from_config(config: &ExposureConfig) -> Self {
        Self::new(config.exposure_duration_secs)
    }

    /// Close-contact seconds at which a peer becomes an exposure.
    #[must_use]
    pub const fn threshold_secs(&self) -> u64 {
        self.exposure_duration_secs
    }

    /// Verdict for a close-contact total.
    #[must_use]
    pub const fn status_for(&self, close_contact_seconds: u64) -> ExposureStatus {
        if close_contact_seconds >= self.exposure_duration_secs {
            ExposureStatus::Exposure
        } else {
            ExposureStatus::Normal
        }
    }

    /// Update the ledger with `observation` and build its record.
    ///
    /// The only side effect is the ledger update; identical inputs against
    /// identical ledger state give identical records.
    ///
    /// # Errors
    ///
    /// Propagates ledger persistence failures.
    pub fn evaluate(
        &self,
        ledger: &mut ContactLedger,
        observation: &PeerObservation,
        now: Timestamp,
        self_token: &str,
        upload_duration_hint: u64,
    ) -> LedgerResult<OutputRecord> {
        let peer = observation.address.as_str();

        let first_seen = ledger.touch(peer, now)?;
        ledger.update_proximity(peer, now, observation.signal_strength)?;
        let contact_duration_seconds = elapsed_secs(first_seen, now);
        let close_contact_duration_seconds = ledger.close_contact_seconds(peer, now);
        let exposure_status = self.status_for(close_contact_duration_seconds);

        if exposure_status == ExposureStatus::Exposure {
            warn!(
                peer,
                close_contact_duration_seconds,
                threshold_secs = self.exposure_duration_secs,
                "Exposure threshold reached"
            );
        }

        Ok(OutputRecord {
            timestamp: now,
            peer_address: observation.address.clone(),
            signal_strength: observation.signal_strength,
            self_token: self_token.to_string(),
            upload_duration_hint,
            contact_duration_seconds,
            close_contact_duration_seconds,
            exposure_status,
        })
    }
}
