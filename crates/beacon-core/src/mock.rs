//! In-memory radio for bench runs and tests.
//!
//! [`MockScanner`] replays scripted scan results (or a fixed peer set on
//! every scan); [`MockAdvertiser`] records what would be on air.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::radio::{Advertiser, PeerScanner, RadioError, RadioResult};
use crate::types::PeerObservation;

/// Scanner that reports canned observations.
#[derive(Debug, Default)]
pub struct MockScanner {
    script: VecDeque<RadioResult<Vec<PeerObservation>>>,
    fixed: Vec<PeerObservation>,
    simulate_window: bool,
    scans: usize,
}

impl MockScanner {
    /// Report the same peers on every scan.
    #[must_use]
    pub fn fixed(peers: Vec<PeerObservation>) -> Self {
        Self {
            fixed: peers,
            ..Self::default()
        }
    }

    /// Report each scripted result once, in order, then nothing.
    #[must_use]
    pub fn scripted(script: impl IntoIterator<Item = RadioResult<Vec<PeerObservation>>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Actually wait out the scan window, like real hardware.
    #[must_use]
    pub const fn simulating_window(mut self) -> Self {
        self.simulate_window = true;
        self
    }

    /// Queue one more scan result.
    pub fn push_scan(&mut self, peers: Vec<PeerObservation>) {
        self.script.push_back(Ok(peers));
    }

    /// Queue a failing scan.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(RadioError::ScanFailed {
            message: message.into(),
        }));
    }

    /// Number of scans performed so far.
    #[must_use]
    pub const fn scans(&self) -> usize {
        self.scans
    }
}

#[async_trait]
impl PeerScanner for MockScanner {
    async fn scan(&mut self, window: Duration) -> RadioResult<Vec<PeerObservation>> {
        self.scans += 1;
        if self.simulate_window {
            tokio::time::sleep(window).await;
        }
        match self.script.pop_front() {
            Some(result) => result,
            None => Ok(self.fixed.clone()),
        }
    }
}

/// Advertiser that remembers every token it was given.
#[derive(Debug, Default)]
pub struct MockAdvertiser {
    on_air: Option<String>,
    history: Vec<String>,
    fail_next: bool,
}

impl MockAdvertiser {
    /// Token currently advertised, if any.
    #[must_use]
    pub fn on_air(&self) -> Option<&str> {
        self.on_air.as_deref()
    }

    /// Every token ever advertised, oldest first.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Make the next `advertise` call fail.
    pub fn fail_next_advertise(&mut self) {
        self.fail_next = true;
    }
}

#[async_trait]
impl Advertiser for MockAdvertiser {
    async fn advertise(&mut self, token: &str) -> RadioResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(RadioError::AdvertiseFailed {
                message: "mock advertiser configured to fail".into(),
            });
        }
        debug!(token, "Mock advertising");
        self.on_air = Some(token.to_string());
        self.history.push(token.to_string());
        Ok(())
    }

    async fn stop(&mut self) -> RadioResult<()> {
        self.on_air = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_empty() {
        let mut scanner = MockScanner::scripted([Ok(vec![PeerObservation::new(
            "AA", -50, "CTB00000000",
        )])]);
        scanner.push_failure("adapter reset");

        assert_eq!(scanner.scan(Duration::ZERO).await.unwrap().len(), 1);
        assert!(scanner.scan(Duration::ZERO).await.is_err());
        assert!(scanner.scan(Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(scanner.scans(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_window_waits() {
        let mut scanner = MockScanner::fixed(Vec::new()).simulating_window();
        let started = tokio::time::Instant::now();
        scanner.scan(Duration::from_secs(15)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(15));
    }
}
