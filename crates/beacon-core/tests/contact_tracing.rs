//! End-to-end behaviour of the contact-tracing core: scan cycles against a
//! scripted radio, a real ledger file, and a scripted uplink channel.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{
    BeaconConfig, ContactLedger, DatagramChannel, ExposureStatus, IdentityManager, MockAdvertiser,
    MockScanner, Outbox, OutputRecord, PeerObservation, RecordLog, ReliableUplink, ScanCycle,
    UplinkSettings,
};
use rand::rngs::OsRng;

const PEER: &str = "AA:BB:CC:DD:EE:01";
const PEER_TOKEN: &str = "CTB7Q2M9K1Z";

type Cycle = ScanCycle<MockScanner, MockAdvertiser, OsRng>;

async fn build_cycle(dir: &tempfile::TempDir) -> Cycle {
    let config = BeaconConfig::default();
    let identity = IdentityManager::new(MockAdvertiser::default(), OsRng, &config.identity, 0)
        .await
        .unwrap();
    let ledger = ContactLedger::open(
        dir.path().join("ledger.json"),
        config.exposure.close_contact_rssi,
    )
    .unwrap();
    ScanCycle::new(MockScanner::default(), identity, ledger, &config).unwrap()
}

async fn observe(cycle: &mut Cycle, now: u64, rssi: i16) -> Vec<OutputRecord> {
    cycle
        .scanner_mut()
        .push_scan(vec![PeerObservation::new(PEER, rssi, PEER_TOKEN)]);
    cycle.run_once(now).await.unwrap()
}

#[tokio::test]
async fn far_close_far_scenario_reaches_exposure() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;

    let first = observe(&mut cycle, 0, -80).await;
    assert_eq!(first[0].contact_duration_seconds, 0);
    assert_eq!(first[0].exposure_status, ExposureStatus::Normal);

    let second = observe(&mut cycle, 310, -50).await;
    assert_eq!(second[0].contact_duration_seconds, 310);
    assert_eq!(second[0].close_contact_duration_seconds, 0);
    assert_eq!(second[0].exposure_status, ExposureStatus::Normal);

    let third = observe(&mut cycle, 620, -80).await;
    assert_eq!(third[0].contact_duration_seconds, 620);
    assert_eq!(third[0].close_contact_duration_seconds, 310);
    assert_eq!(third[0].exposure_status, ExposureStatus::Exposure);
}

#[tokio::test]
async fn exposure_boundary_around_threshold() {
    for (close_for, expected) in [
        (299, ExposureStatus::Normal),
        (300, ExposureStatus::Exposure),
        (301, ExposureStatus::Exposure),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let mut cycle = build_cycle(&dir).await;

        observe(&mut cycle, 1000, -40).await;
        let records = observe(&mut cycle, 1000 + close_for, -40).await;

        assert_eq!(records[0].close_contact_duration_seconds, close_for);
        assert_eq!(records[0].exposure_status, expected, "close for {close_for}s");
    }
}

#[tokio::test]
async fn repeated_close_intervals_are_not_double_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;

    observe(&mut cycle, 0, -50).await;
    observe(&mut cycle, 15, -50).await;
    observe(&mut cycle, 30, -85).await;
    observe(&mut cycle, 45, -85).await;
    observe(&mut cycle, 60, -55).await;
    let records = observe(&mut cycle, 100, -85).await;

    assert_eq!(records[0].close_contact_duration_seconds, 30 + 40);
    let record = cycle.ledger().get(PEER).unwrap();
    assert_eq!(record.cumulative_close_contact_seconds, 70);
    assert!(!record.is_close());
}

#[tokio::test]
async fn noise_floor_observation_never_reaches_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;

    let records = observe(&mut cycle, 0, -95).await;

    assert!(records.is_empty());
    assert!(cycle.ledger().get(PEER).is_none());

    // A later in-range sighting starts the contact clock only then.
    let records = observe(&mut cycle, 40, -70).await;
    assert_eq!(records[0].contact_duration_seconds, 0);
    assert_eq!(cycle.ledger().get(PEER).unwrap().first_seen_at, 40);
}

#[tokio::test]
async fn self_and_foreign_advertisements_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;
    let own = cycle.identity().current_token().to_string();
    cycle.scanner_mut().push_scan(vec![
        PeerObservation::new("AA:BB:CC:DD:EE:02", -40, own),
        PeerObservation::new("AA:BB:CC:DD:EE:03", -40, "Galaxy Buds"),
        PeerObservation::new("AA:BB:CC:DD:EE:04", -40, ""),
    ]);

    let records = cycle.run_once(0).await.unwrap();

    assert!(records.is_empty());
    assert!(cycle.ledger().is_empty());
}

#[tokio::test]
async fn identity_rotates_every_cycle_even_when_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;

    for now in [15, 30, 45] {
        assert!(cycle.run_once(now).await.unwrap().is_empty());
    }

    let history = cycle.identity().advertiser().history();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|pair| pair[0] != pair[1]));
    assert_eq!(cycle.scanner().scans(), 3);
}

#[tokio::test]
async fn ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut cycle = build_cycle(&dir).await;
        observe(&mut cycle, 100, -50).await;
        observe(&mut cycle, 200, -80).await;
    }

    let mut cycle = build_cycle(&dir).await;
    let records = observe(&mut cycle, 500, -80).await;

    assert_eq!(records[0].contact_duration_seconds, 400);
    assert_eq!(records[0].close_contact_duration_seconds, 100);
}

/// Collector that acks the given send numbers.
#[derive(Default)]
struct Collector {
    sends: usize,
    ack_sends: Vec<usize>,
    inbox: VecDeque<Vec<u8>>,
}

#[async_trait]
impl DatagramChannel for Collector {
    async fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.sends += 1;
        if self.ack_sends.contains(&self.sends) {
            self.inbox.push_back(b"ACK".to_vec());
        }
        Ok(payload.len())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        Ok(self.inbox.pop_front().map(|datagram| {
            buf[..datagram.len()].copy_from_slice(&datagram);
            datagram.len()
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn uplink_gives_up_after_three_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;
    let record = observe(&mut cycle, 0, -60).await.remove(0);
    let mut uplink = ReliableUplink::new(Collector::default(), UplinkSettings::default());

    assert!(!uplink.send(&record).await);
    assert_eq!(uplink.channel().sends, 3);
}

#[tokio::test(start_paused = true)]
async fn uplink_succeeds_on_second_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;
    let record = observe(&mut cycle, 0, -60).await.remove(0);
    let collector = Collector {
        ack_sends: vec![2],
        ..Collector::default()
    };
    let mut uplink = ReliableUplink::new(collector, UplinkSettings::default());

    let delivery = uplink.deliver(&record).await;

    assert!(delivery.acknowledged);
    assert_eq!(delivery.attempts, 2);
    assert_eq!(uplink.channel().sends, 2);
    assert!(delivery.elapsed >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn undelivered_records_wait_in_outbox_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut cycle = build_cycle(&dir).await;
    let mut log = RecordLog::open(dir.path().join("data.csv")).unwrap();
    let mut outbox = Outbox::open(dir.path().join("outbox.csv"), 500).unwrap();
    let mut uplink = ReliableUplink::new(Collector::default(), UplinkSettings::default());

    for record in observe(&mut cycle, 0, -60).await {
        log.append(&record).unwrap();
        if !uplink.send(&record).await {
            outbox.push(&record).unwrap();
        }
    }

    assert_eq!(log.read_records().unwrap().len(), 1);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox.pending(), log.read_records().unwrap());
}
