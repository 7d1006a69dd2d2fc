//! Acknowledged delivery of records to the collector.
//!
//! The transport is an unreliable datagram channel. [`ReliableUplink`] adds
//! stop-and-wait semantics on top: send the record, wait for the ack token,
//! resend on timeout, give up after a bounded number of attempts. At most
//! one attempt is ever in flight.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::UplinkConfig;
use crate::record::OutputRecord;
use crate::wait::{poll_until, Deadline};

/// Receive buffer size. Acks are tiny; anything longer is not an ack.
const RECV_BUFFER: usize = 64;

/// Upper bound on datagrams discarded before a delivery starts.
const MAX_STALE_DRAIN: usize = 256;

/// A connected, unreliable datagram transport.
#[async_trait]
pub trait DatagramChannel: Send {
    /// Send `payload` as one datagram.
    async fn send(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Receive one queued datagram without waiting. `Ok(None)` when nothing
    /// is queued.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Retry policy for [`ReliableUplink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkSettings {
    /// Sends per record before giving up.
    pub max_attempts: u32,
    /// How long each attempt waits for the ack.
    pub ack_timeout: Duration,
    /// How often the channel is checked while waiting.
    pub poll_interval: Duration,
    /// Exact payload of an acknowledgement.
    pub ack_token: Vec<u8>,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self::from_config(&UplinkConfig::default())
    }
}

impl UplinkSettings {
    /// Settings from the `[uplink]` config section.
    #[must_use]
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            ack_token: config.ack_token.as_bytes().to_vec(),
        }
    }
}

/// Outcome of one [`ReliableUplink::deliver`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Whether the collector acknowledged the record.
    pub acknowledged: bool,
    /// Attempts made, including failed sends.
    pub attempts: u32,
    /// Wall time spent, from first send to ack or give-up.
    pub elapsed: Duration,
}

/// Stop-and-wait sender over a [`DatagramChannel`].
#[derive(Debug)]
pub struct ReliableUplink<C> {
    channel: C,
    settings: UplinkSettings,
}

impl<C: DatagramChannel> ReliableUplink<C> {
    /// Wrap `channel` with the given retry policy.
    pub const fn new(channel: C, settings: UplinkSettings) -> Self {
        Self { channel, settings }
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn settings(&self) -> &UplinkSettings {
        &self.settings
    }

    /// Underlying channel.
    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutable access to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Deliver `record`, reporting only whether it was acknowledged.
    pub async fn send(&mut self, record: &OutputRecord) -> bool {
        self.deliver(record).await.acknowledged
    }

    /// Deliver `record` and report how it went.
    ///
    /// Never fails: transport errors and timeouts are logged and end in an
    /// unacknowledged [`Delivery`].
    #[instrument(skip_all, fields(peer = %record.peer_address, timestamp = record.timestamp))]
    pub async fn deliver(&mut self, record: &OutputRecord) -> Delivery {
        let started = Instant::now();
        let payload = record.to_string();
        self.drain_stale();

        let mut attempts = 0;
        while attempts < self.settings.max_attempts {
            attempts += 1;
            let deadline = Deadline::after(self.settings.ack_timeout);

            if let Err(err) = self.channel.send(payload.as_bytes()).await {
                warn!(attempt = attempts, error = %err, "Uplink send failed");
                // A failed attempt still occupies its whole ack window.
                tokio::time::sleep_until(deadline.instant()).await;
                continue;
            }
            debug!(attempt = attempts, bytes = payload.len(), "Record sent, awaiting ack");

            if self.await_ack(deadline).await {
                let elapsed = started.elapsed();
                info!(attempts, ?elapsed, "Record acknowledged");
                return Delivery {
                    acknowledged: true,
                    attempts,
                    elapsed,
                };
            }
            warn!(attempt = attempts, "No ack before deadline");
        }

        warn!(attempts, "Giving up on record");
        Delivery {
            acknowledged: false,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    async fn await_ack(&mut self, deadline: Deadline) -> bool {
        let interval = self.settings.poll_interval;
        let ack = self.settings.ack_token.as_slice();
        let channel = &mut self.channel;
        let mut buf = [0u8; RECV_BUFFER];

        poll_until(deadline, interval, || loop {
            match channel.try_recv(&mut buf) {
                Ok(Some(len)) if buf.get(..len) == Some(ack) => return Some(()),
                Ok(Some(len)) => {
                    debug!(bytes = len, "Ignoring datagram that is not an ack");
                }
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "Uplink receive failed");
                    return None;
                }
            }
        })
        .await
        .is_some()
    }

    /// Discard datagrams left over from earlier deliveries so a late ack
    /// cannot confirm the wrong record.
    fn drain_stale(&mut self) {
        let mut buf = [0u8; RECV_BUFFER];
        let mut drained = 0;
        while drained < MAX_STALE_DRAIN {
            match self.channel.try_recv(&mut buf) {
                Ok(Some(_)) => drained += 1,
                Ok(None) | Err(_) => break,
            }
        }
        if drained > 0 {
            debug!(drained, "Discarded stale datagrams");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExposureStatus;
    use std::collections::VecDeque;

    /// Channel that acks a chosen send and can inject replies.
    #[derive(Default)]
    struct ScriptedChannel {
        sent: Vec<Vec<u8>>,
        inbox: VecDeque<Vec<u8>>,
        replies: Vec<(usize, Vec<u8>)>,
    }

    impl ScriptedChannel {
        fn reply_after(mut self, send: usize, payload: &[u8]) -> Self {
            self.replies.push((send, payload.to_vec()));
            self
        }
    }

    #[async_trait]
    impl DatagramChannel for ScriptedChannel {
        async fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            self.sent.push(payload.to_vec());
            let count = self.sent.len();
            for (_, reply) in self.replies.iter().filter(|(n, _)| *n == count) {
                self.inbox.push_back(reply.clone());
            }
            Ok(payload.len())
        }

        fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
            Ok(self.inbox.pop_front().map(|datagram| {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                len
            }))
        }
    }

    fn record() -> OutputRecord {
        OutputRecord {
            timestamp: 1_700_000_000,
            peer_address: "AA:BB:CC:DD:EE:01".into(),
            signal_strength: -55,
            self_token: "CTBSELF0001".into(),
            upload_duration_hint: 0,
            contact_duration_seconds: 620,
            close_contact_duration_seconds: 310,
            exposure_status: ExposureStatus::Exposure,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_acked_makes_exactly_max_attempts() {
        let mut uplink = ReliableUplink::new(ScriptedChannel::default(), UplinkSettings::default());

        let delivery = uplink.deliver(&record()).await;

        assert!(!delivery.acknowledged);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(uplink.channel().sent.len(), 3);
        assert!(delivery.elapsed >= Duration::from_secs(15));
        assert!(delivery.elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_on_second_attempt() {
        let channel = ScriptedChannel::default().reply_after(2, b"ACK");
        let mut uplink = ReliableUplink::new(channel, UplinkSettings::default());

        assert!(uplink.send(&record()).await);
        assert_eq!(uplink.channel().sent.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_is_record_line_without_newline() {
        let channel = ScriptedChannel::default().reply_after(1, b"ACK");
        let mut uplink = ReliableUplink::new(channel, UplinkSettings::default());

        uplink.send(&record()).await;

        let sent = String::from_utf8(uplink.channel().sent[0].clone()).unwrap();
        assert_eq!(sent, record().to_string());
        assert!(!sent.ends_with('\n'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ack_datagrams_are_ignored() {
        let channel = ScriptedChannel::default()
            .reply_after(1, b"ack")
            .reply_after(1, b"NACK")
            .reply_after(1, b"ACK\n");
        let mut uplink = ReliableUplink::new(channel, UplinkSettings::default());

        let delivery = uplink.deliver(&record()).await;

        assert!(!delivery.acknowledged);
        assert_eq!(delivery.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ack_is_drained() {
        let mut channel = ScriptedChannel::default();
        channel.inbox.push_back(b"ACK".to_vec());
        let mut uplink = ReliableUplink::new(channel, UplinkSettings::default());

        let delivery = uplink.deliver(&record()).await;

        assert!(!delivery.acknowledged);
        assert_eq!(delivery.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_error_counts_as_attempt() {
        struct BrokenChannel {
            sends: u32,
        }

        #[async_trait]
        impl DatagramChannel for BrokenChannel {
            async fn send(&mut self, _payload: &[u8]) -> io::Result<usize> {
                self.sends += 1;
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "collector down"))
            }

            fn try_recv(&mut self, _buf: &mut [u8]) -> io::Result<Option<usize>> {
                Ok(None)
            }
        }

        let mut uplink = ReliableUplink::new(BrokenChannel { sends: 0 }, UplinkSettings::default());

        let delivery = uplink.deliver(&record()).await;

        assert!(!delivery.acknowledged);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(uplink.channel().sends, 3);
        assert!(delivery.elapsed >= Duration::from_secs(15));
        assert!(delivery.elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_send_error_waits_for_deadline() {
        /// Refuses the first send, then acks.
        #[derive(Default)]
        struct FlakyChannel {
            sent_at: Vec<Instant>,
            inbox: VecDeque<Vec<u8>>,
        }

        #[async_trait]
        impl DatagramChannel for FlakyChannel {
            async fn send(&mut self, _payload: &[u8]) -> io::Result<usize> {
                self.sent_at.push(Instant::now());
                if self.sent_at.len() == 1 {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "icmp unreachable"));
                }
                self.inbox.push_back(b"ACK".to_vec());
                Ok(3)
            }

            fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
                Ok(self.inbox.pop_front().map(|datagram| {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    datagram.len()
                }))
            }
        }

        let mut uplink = ReliableUplink::new(FlakyChannel::default(), UplinkSettings::default());

        let delivery = uplink.deliver(&record()).await;

        assert!(delivery.acknowledged);
        assert_eq!(delivery.attempts, 2);
        let sent_at = &uplink.channel().sent_at;
        assert!(sent_at[1] - sent_at[0] >= Duration::from_secs(5));
    }

    #[test]
    fn test_settings_from_config() {
        let config = UplinkConfig {
            max_attempts: 5,
            ack_timeout_ms: 250,
            ack_token: "OK".into(),
            ..UplinkConfig::default()
        };
        let settings = UplinkSettings::from_config(&config);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.ack_timeout, Duration::from_millis(250));
        assert_eq!(settings.poll_interval, Duration::from_millis(10));
        assert_eq!(settings.ack_token, b"OK");
    }
}
