//! Durable queue of records the collector never acknowledged.
//!
//! Same line format as the record log, without a header. The whole file is
//! rewritten atomically on every change, and the queue is bounded: once
//! full, the oldest records are dropped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::record::OutputRecord;
use crate::record_log::parse_lines;
use crate::storage::{write_atomic, StorageError, StorageResult};

/// Bounded, file-backed FIFO of undelivered records.
#[derive(Debug)]
pub struct Outbox {
    path: PathBuf,
    capacity: usize,
    pending: VecDeque<OutputRecord>,
}

impl Outbox {
    /// Load the outbox at `path`, or start empty if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadError`] if an existing file cannot be
    /// read. Unparseable lines are dropped with a warning.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> StorageResult<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(StorageError::ReadError { path, source }),
        };

        let mut outbox = Self {
            pending: parse_lines(&content, &path).into(),
            path,
            capacity,
        };
        outbox.enforce_capacity();
        if !outbox.is_empty() {
            info!(
                path = %outbox.path.display(),
                pending = outbox.len(),
                "Outbox has undelivered records"
            );
        }
        Ok(outbox)
    }

    /// Outbox file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum records kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records waiting for delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot of the queue, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<OutputRecord> {
        self.pending.iter().cloned().collect()
    }

    /// Queue `record` behind everything already pending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteError`] if the queue cannot be
    /// persisted; the record is not kept.
    pub fn push(&mut self, record: &OutputRecord) -> StorageResult<()> {
        let previous = self.pending.clone();
        self.pending.push_back(record.clone());
        self.enforce_capacity();

        if let Err(err) = self.persist() {
            self.pending = previous;
            return Err(err);
        }
        debug!(pending = self.len(), "Record queued for redelivery");
        Ok(())
    }

    /// Replace the whole queue with `records`, e.g. whatever is still
    /// undelivered after a replay.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteError`] if the queue cannot be
    /// persisted; the previous queue is kept.
    pub fn replace(&mut self, records: &[OutputRecord]) -> StorageResult<()> {
        let previous = std::mem::replace(&mut self.pending, records.iter().cloned().collect());
        self.enforce_capacity();

        if let Err(err) = self.persist() {
            self.pending = previous;
            return Err(err);
        }
        Ok(())
    }

    fn enforce_capacity(&mut self) {
        let excess = self.pending.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.pending.drain(..excess);
            warn!(
                dropped = excess,
                capacity = self.capacity,
                "Outbox full, dropped oldest records"
            );
        }
    }

    fn persist(&self) -> StorageResult<()> {
        let content: String = self
            .pending
            .iter()
            .map(|record| format!("{record}\n"))
            .collect();
        write_atomic(&self.path, content.as_bytes()).map_err(|source| StorageError::WriteError {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExposureStatus;

    fn record(timestamp: u64) -> OutputRecord {
        OutputRecord {
            timestamp,
            peer_address: "AA:BB:CC:DD:EE:01".into(),
            signal_strength: -70,
            self_token: "CTBSELF0001".into(),
            upload_duration_hint: 0,
            contact_duration_seconds: 0,
            close_contact_duration_seconds: 0,
            exposure_status: ExposureStatus::Normal,
        }
    }

    #[test]
    fn test_push_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.csv");
        {
            let mut outbox = Outbox::open(&path, 10).unwrap();
            outbox.push(&record(1)).unwrap();
            outbox.push(&record(2)).unwrap();
        }

        let outbox = Outbox::open(&path, 10).unwrap();
        assert_eq!(outbox.pending(), vec![record(1), record(2)]);
    }

    #[test]
    fn test_full_outbox_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = Outbox::open(dir.path().join("outbox.csv"), 2).unwrap();

        for timestamp in 1..=3 {
            outbox.push(&record(timestamp)).unwrap();
        }

        assert_eq!(outbox.pending(), vec![record(2), record(3)]);
    }

    #[test]
    fn test_replace_removes_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.csv");
        let mut outbox = Outbox::open(&path, 10).unwrap();
        outbox.push(&record(1)).unwrap();
        outbox.push(&record(2)).unwrap();

        outbox.replace(&[record(2)]).unwrap();
        assert_eq!(outbox.len(), 1);

        outbox.replace(&[]).unwrap();
        assert!(outbox.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_reopen_with_smaller_capacity_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.csv");
        let mut outbox = Outbox::open(&path, 10).unwrap();
        for timestamp in 1..=4 {
            outbox.push(&record(timestamp)).unwrap();
        }

        let outbox = Outbox::open(&path, 2).unwrap();
        assert_eq!(outbox.pending(), vec![record(3), record(4)]);
    }

    #[test]
    fn test_failed_push_keeps_queue_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut outbox = Outbox::open(dir.path().join("outbox.csv"), 10).unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        outbox.path = blocker.join("outbox.csv");

        assert!(matches!(
            outbox.push(&record(1)),
            Err(StorageError::WriteError { .. })
        ));
        assert!(outbox.is_empty());
    }
}
