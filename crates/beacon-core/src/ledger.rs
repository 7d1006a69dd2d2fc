//! Durable per-peer contact accounting.
//!
//! The [`ContactLedger`] maps a peer address to its [`ContactRecord`] and is
//! the only place that state lives. Every mutation is written through to a
//! JSON file before it is acknowledged, so first-seen times and accumulated
//! close-contact time survive a power cut.
//!
//! Each peer runs a two-state machine driven by signal strength against the
//! close-contact threshold:
//!
//! ```text
//!            rssi >= threshold                 rssi < threshold
//!   FAR ------------------------> CLOSE ------------------------> FAR
//!         start = now                    cumulative += now - start
//! ```
//!
//! Transitions happen only on observations. A peer that was CLOSE when last
//! seen and then disappears keeps its interval open: the next sighting,
//! however much later and even across a restart, counts the whole absence
//! as close contact (and closes the interval if that sighting is FAR).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::write_atomic;
use crate::types::{elapsed_secs, Timestamp};

const LEDGER_VERSION: u32 = 1;

/// Ledger-specific errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file exists but cannot be loaded, or cannot be created.
    #[error("ledger unavailable at {}: {reason}", path.display())]
    Unavailable {
        /// Ledger file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// A proximity update named a peer that was never touched.
    #[error("peer {address} has no contact record")]
    UnknownPeer {
        /// Peer address.
        address: String,
    },

    /// Writing the ledger failed; the in-memory change was rolled back.
    #[error("failed to persist ledger to {}: {source}", path.display())]
    PersistFailed {
        /// Ledger file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The ledger could not be encoded.
    #[error("failed to encode ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Persistent contact state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// First time this peer was ever observed. Never changes.
    pub first_seen_at: Timestamp,
    /// Start of the ongoing close-contact interval, if the peer is close.
    pub last_close_contact_start: Option<Timestamp>,
    /// Seconds of completed close-contact intervals.
    pub cumulative_close_contact_seconds: u64,
}

impl ContactRecord {
    const fn new(now: Timestamp) -> Self {
        Self {
            first_seen_at: now,
            last_close_contact_start: None,
            cumulative_close_contact_seconds: 0,
        }
    }

    /// Whether the peer is currently within close-contact range.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        self.last_close_contact_start.is_some()
    }

    /// Cumulative close-contact seconds as of `now`, counting an open
    /// interval without closing it.
    #[must_use]
    pub const fn close_contact_seconds(&self, now: Timestamp) -> u64 {
        match self.last_close_contact_start {
            Some(start) => self
                .cumulative_close_contact_seconds
                .saturating_add(elapsed_secs(start, now)),
            None => self.cumulative_close_contact_seconds,
        }
    }
}

/// What an observation did to a peer's proximity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityTransition {
    /// FAR to CLOSE: an interval opened.
    EnteredClose,
    /// Still CLOSE: nothing changed.
    StillClose,
    /// CLOSE to FAR: an interval of `interval_secs` was folded in.
    LeftClose {
        /// Length of the interval that just closed.
        interval_secs: u64,
    },
    /// Still FAR: nothing changed.
    StillFar,
}

#[derive(Debug, Deserialize)]
struct LedgerFile {
    version: u32,
    peers: BTreeMap<String, ContactRecord>,
}

/// Address-keyed store of [`ContactRecord`]s, persisted on every change.
#[derive(Debug)]
pub struct ContactLedger {
    path: PathBuf,
    close_contact_rssi: i16,
    peers: BTreeMap<String, ContactRecord>,
}

impl ContactLedger {
    /// Load the ledger at `path`, creating an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if an existing file cannot be
    /// read or parsed, or a new one cannot be written. Running on with an
    /// empty ledger would reset every peer's first-seen time.
    pub fn open(path: impl Into<PathBuf>, close_contact_rssi: i16) -> LedgerResult<Self> {
        let path = path.into();
        let unavailable = |path: &Path, reason: String| LedgerError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        let peers = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: LedgerFile = serde_json::from_str(&content)
                    .map_err(|e| unavailable(&path, e.to_string()))?;
                if file.version != LEDGER_VERSION {
                    return Err(unavailable(
                        &path,
                        format!("unsupported ledger version {}", file.version),
                    ));
                }
                file.peers
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(unavailable(&path, err.to_string())),
        };

        let ledger = Self {
            path,
            close_contact_rssi,
            peers,
        };
        if ledger.peers.is_empty() {
            ledger
                .persist()
                .map_err(|e| unavailable(&ledger.path, e.to_string()))?;
        }
        info!(
            path = %ledger.path.display(),
            peers = ledger.peers.len(),
            "Contact ledger opened"
        );
        Ok(ledger)
    }

    /// Ledger file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of peers ever seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has ever been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Contact record for `address`, if the peer has been seen.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&ContactRecord> {
        self.peers.get(address)
    }

    /// Record that `address` was observed at `now` and return its
    /// authoritative first-seen time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistFailed`] if a new record cannot be
    /// written; the record is not kept in memory either.
    pub fn touch(&mut self, address: &str, now: Timestamp) -> LedgerResult<Timestamp> {
        if let Some(record) = self.peers.get(address) {
            return Ok(record.first_seen_at);
        }

        self.peers.insert(address.to_string(), ContactRecord::new(now));
        self.commit(address, None)?;
        debug!(peer = address, first_seen_at = now, "New peer recorded");
        Ok(now)
    }

    /// Apply one signal-strength observation to the peer's FAR/CLOSE state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownPeer`] for an address never touched, or
    /// [`LedgerError::PersistFailed`] if the change cannot be written (the
    /// change is rolled back).
    pub fn update_proximity(
        &mut self,
        address: &str,
        now: Timestamp,
        signal_strength: i16,
    ) -> LedgerResult<ProximityTransition> {
        let threshold = self.close_contact_rssi;
        let record = self
            .peers
            .get_mut(address)
            .ok_or_else(|| LedgerError::UnknownPeer {
                address: address.to_string(),
            })?;
        let previous = *record;
        let is_close = signal_strength >= threshold;

        let transition = match (record.last_close_contact_start, is_close) {
            (None, true) => {
                record.last_close_contact_start = Some(now);
                ProximityTransition::EnteredClose
            }
            (Some(start), false) => {
                let interval_secs = elapsed_secs(start, now);
                record.cumulative_close_contact_seconds = record
                    .cumulative_close_contact_seconds
                    .saturating_add(interval_secs);
                record.last_close_contact_start = None;
                ProximityTransition::LeftClose { interval_secs }
            }
            (Some(_), true) => ProximityTransition::StillClose,
            (None, false) => ProximityTransition::StillFar,
        };

        if matches!(
            transition,
            ProximityTransition::EnteredClose | ProximityTransition::LeftClose { .. }
        ) {
            self.commit(address, Some(previous))?;
            info!(peer = address, signal_strength, ?transition, "Close-contact state changed");
        }
        Ok(transition)
    }

    /// Cumulative close-contact seconds for `address` as of `now`, including
    /// an in-progress interval. Pure read; unknown peers report zero.
    #[must_use]
    pub fn close_contact_seconds(&self, address: &str, now: Timestamp) -> u64 {
        self.peers
            .get(address)
            .map_or(0, |record| record.close_contact_seconds(now))
    }

    /// Persist the current state, restoring `address` to `previous` if the
    /// write fails.
    fn commit(&mut self, address: &str, previous: Option<ContactRecord>) -> LedgerResult<()> {
        if let Err(err) = self.persist() {
            match previous {
                Some(record) => self.peers.insert(address.to_string(), record),
                None => self.peers.remove(address),
            };
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> LedgerResult<()> {
        let file = LedgerFileRef {
            version: LEDGER_VERSION,
            peers: &self.peers,
        };
        let content = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &content).map_err(|source| LedgerError::PersistFailed {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    peers: &'a BTreeMap<String, ContactRecord>,
}
