//! The device loop.
//!
//! Each cycle:
//! 1. retry the outbox oldest first, stopping at the first record the
//!    collector does not acknowledge
//! 2. run a scan cycle
//! 3. log every record locally, then hand it to the uplink
//! 4. queue undelivered records in the outbox
//!
//! Fatal errors end the loop; everything else is logged and the next cycle
//! starts on schedule.

use std::future::Future;
use std::time::Duration;

use beacon_core::{
    Advertiser, BeaconError, Clock, DatagramChannel, OutputRecord, Outbox, PeerScanner,
    RecordLog, ReliableUplink, ScanCycle,
};
use rand::RngCore;
use tracing::{error, info, warn};

/// What one cycle produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Records produced by the scan.
    pub records: usize,
    /// Records acknowledged by the collector, including outbox replays.
    pub delivered: usize,
    /// Records left in the outbox afterwards.
    pub queued: usize,
}

/// Everything the device loop drives.
pub struct Node<S, A, R, C, K> {
    cycle: ScanCycle<S, A, R>,
    uplink: ReliableUplink<C>,
    log: RecordLog,
    outbox: Outbox,
    clock: K,
}

impl<S, A, R, C, K> Node<S, A, R, C, K>
where
    S: PeerScanner,
    A: Advertiser,
    R: RngCore + Send,
    C: DatagramChannel,
    K: Clock,
{
    /// Assemble a node.
    pub const fn new(
        cycle: ScanCycle<S, A, R>,
        uplink: ReliableUplink<C>,
        log: RecordLog,
        outbox: Outbox,
        clock: K,
    ) -> Self {
        Self {
            cycle,
            uplink,
            log,
            outbox,
            clock,
        }
    }

    /// The scan cycle.
    #[must_use]
    pub const fn cycle(&self) -> &ScanCycle<S, A, R> {
        &self.cycle
    }

    /// The outbox.
    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// The record log.
    #[must_use]
    pub const fn log(&self) -> &RecordLog {
        &self.log
    }

    /// The uplink.
    #[must_use]
    pub const fn uplink(&self) -> &ReliableUplink<C> {
        &self.uplink
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// Returns the scan cycle's error. Callers decide from
    /// [`BeaconError::is_fatal`] whether to keep going.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, BeaconError> {
        let mut summary = CycleSummary {
            delivered: self.replay_outbox().await,
            ..CycleSummary::default()
        };

        let records = self.cycle.run_once(self.clock.now()).await?;
        summary.records = records.len();

        let mut last_elapsed = None;
        for record in &records {
            if let Err(err) = self.log.append(record) {
                warn!(error = %err, "Failed to log record, continuing with uplink");
            }

            let delivery = self.uplink.deliver(record).await;
            last_elapsed = Some(delivery.elapsed);
            if delivery.acknowledged {
                summary.delivered += 1;
            } else {
                self.enqueue(record);
            }
        }
        if let Some(elapsed) = last_elapsed {
            self.cycle.set_upload_hint(elapsed);
        }

        summary.queued = self.outbox.len();
        Ok(summary)
    }

    /// Run cycles every `interval` until `shutdown` resolves or a fatal
    /// error occurs.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run_until<F>(&mut self, interval: Duration, shutdown: F) -> Result<(), BeaconError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            match self.run_cycle().await {
                Ok(summary) => info!(
                    records = summary.records,
                    delivered = summary.delivered,
                    queued = summary.queued,
                    "Cycle finished"
                ),
                Err(err) if err.is_fatal() => {
                    error!(code = err.error_code(), error = %err, "Fatal error, stopping");
                    return Err(err);
                }
                Err(err) => warn!(code = err.error_code(), error = %err, "Cycle failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Re-send queued records oldest first; returns how many were delivered.
    ///
    /// The first unacknowledged record ends the replay. It and everything
    /// queued after it stay in order for the next cycle, so an unreachable
    /// collector costs one delivery per cycle rather than one per record.
    async fn replay_outbox(&mut self) -> usize {
        if self.outbox.is_empty() {
            return 0;
        }

        let pending = self.outbox.pending();
        let mut delivered = 0;
        for record in &pending {
            if !self.uplink.send(record).await {
                break;
            }
            delivered += 1;
        }
        if delivered == 0 {
            info!(remaining = pending.len(), "Collector unreachable, outbox kept");
            return 0;
        }

        let remaining = &pending[delivered..];
        if let Err(err) = self.outbox.replace(remaining) {
            error!(error = %err, "Failed to update outbox after replay");
        }
        info!(delivered, remaining = remaining.len(), "Outbox replayed");
        delivered
    }

    fn enqueue(&mut self, record: &OutputRecord) {
        if let Err(err) = self.outbox.push(record) {
            error!(error = %err, peer = %record.peer_address, "Record lost, outbox unwritable");
        }
    }
}
