//! One discovery pass.
//!
//! A [`ScanCycle`] owns every stateful component of the beacon and drives
//! them in a fixed order:
//!
//! 1. capture the token currently on air
//! 2. scan for the configured window
//! 3. for each observation, in report order: filter, apply the noise
//!    floor, evaluate against the ledger
//! 4. rotate the broadcast identity, exactly once
//!
//! Rotation happens last so the self filter never races a token change.

use std::time::Duration;

use rand::RngCore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BeaconConfig;
use crate::error::{BeaconError, Result};
use crate::exposure::ExposureEvaluator;
use crate::filter::PeerFilter;
use crate::identity::IdentityManager;
use crate::ledger::ContactLedger;
use crate::radio::{Advertiser, PeerScanner};
use crate::record::OutputRecord;
use crate::types::{PeerObservation, Timestamp};

/// Scan, evaluate and rotate.
pub struct ScanCycle<S, A, R> {
    scanner: S,
    filter: PeerFilter,
    identity: IdentityManager<A, R>,
    ledger: ContactLedger,
    evaluator: ExposureEvaluator,
    window: Duration,
    min_rssi: i16,
    upload_hint_ms: u64,
}

impl<S, A, R> ScanCycle<S, A, R>
where
    S: PeerScanner,
    A: Advertiser,
    R: RngCore + Send,
{
    /// Assemble a cycle from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::ConfigValidationError`] if the identity
    /// marker cannot be turned into a token pattern.
    pub fn new(
        scanner: S,
        identity: IdentityManager<A, R>,
        ledger: ContactLedger,
        config: &BeaconConfig,
    ) -> Result<Self> {
        let filter = PeerFilter::new(&config.identity)
            .map_err(|e| BeaconError::ConfigValidationError(format!("identity.marker: {e}")))?;

        Ok(Self {
            scanner,
            filter,
            identity,
            ledger,
            evaluator: ExposureEvaluator::from_config(&config.exposure),
            window: config.scan.window(),
            min_rssi: config.scan.min_rssi,
            upload_hint_ms: 0,
        })
    }

    /// Run one pass and return a record for every peer evaluated.
    ///
    /// # Errors
    ///
    /// A failed scan is returned after the identity has still been rotated.
    /// A rotation failure is fatal and takes precedence.
    #[instrument(skip(self))]
    pub async fn run_once(&mut self, now: Timestamp) -> Result<Vec<OutputRecord>> {
        let self_token = self.identity.current_token().to_string();

        let scanned = self.scanner.scan(self.window).await;
        let outcome = match scanned {
            Ok(observations) => {
                debug!(heard = observations.len(), "Scan complete");
                Ok(self.process(&observations, now, &self_token))
            }
            Err(err) => {
                warn!(error = %err, "Scan failed, rotating identity anyway");
                Err(BeaconError::from(err))
            }
        };

        self.identity.rotate(now).await?;

        if let Ok(records) = &outcome {
            info!(
                records = records.len(),
                exposures = records.iter().filter(|r| r.is_exposure()).count(),
                "Scan cycle complete"
            );
        }
        outcome
    }

    fn process(
        &mut self,
        observations: &[PeerObservation],
        now: Timestamp,
        self_token: &str,
    ) -> Vec<OutputRecord> {
        let mut records = Vec::new();

        for observation in observations {
            if !self.filter.is_relevant(observation, self_token) {
                continue;
            }
            if observation.signal_strength < self.min_rssi {
                debug!(
                    peer = %observation.address,
                    signal_strength = observation.signal_strength,
                    min_rssi = self.min_rssi,
                    "Below noise floor, ignoring"
                );
                continue;
            }

            match self.evaluator.evaluate(
                &mut self.ledger,
                observation,
                now,
                self_token,
                self.upload_hint_ms,
            ) {
                Ok(record) => records.push(record),
                Err(err) => {
                    error!(peer = %observation.address, error = %err, "Skipping peer, ledger update failed");
                }
            }
        }

        records
    }

    /// Record how long the last delivery took; stamped on the next
    /// cycle's records.
    pub fn set_upload_hint(&mut self, elapsed: Duration) {
        self.upload_hint_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Upload hint, in milliseconds, for the next cycle's records.
    #[must_use]
    pub const fn upload_hint_ms(&self) -> u64 {
        self.upload_hint_ms
    }

    /// Identity manager.
    #[must_use]
    pub const fn identity(&self) -> &IdentityManager<A, R> {
        &self.identity
    }

    /// Contact ledger.
    #[must_use]
    pub const fn ledger(&self) -> &ContactLedger {
        &self.ledger
    }

    /// Radio scanner.
    #[must_use]
    pub const fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Mutable access to the radio scanner.
    pub fn scanner_mut(&mut self) -> &mut S {
        &mut self.scanner
    }
}
