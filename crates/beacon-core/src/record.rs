//! The contact record emitted once per relevant peer per scan.
//!
//! [`OutputRecord`] has exactly one textual form: the comma-separated line
//! produced by its `Display` impl and accepted by its `FromStr` impl. The
//! record log, the outbox and the uplink payload all use that line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Timestamp;

/// Header row written once when a record file is created.
pub const RECORD_HEADER: &str = "timestamp,peerAddress,signalStrength,selfToken,uploadDurationHint,contactDurationSeconds,closeContactDurationSeconds,exposureStatus";

/// Exposure verdict for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExposureStatus {
    /// Close-contact time is still below the exposure threshold.
    Normal,
    /// Close-contact time has reached the exposure threshold.
    Exposure,
}

impl ExposureStatus {
    /// Wire/log spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Exposure => "EXPOSURE",
        }
    }
}

impl fmt::Display for ExposureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExposureStatus {
    type Err = ParseRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "EXPOSURE" => Ok(Self::Exposure),
            other => Err(ParseRecordError::InvalidStatus(other.to_string())),
        }
    }
}

/// One row of the contact log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Observation time.
    pub timestamp: Timestamp,
    /// Peer radio address.
    pub peer_address: String,
    /// Signal strength of this observation in dBm.
    pub signal_strength: i16,
    /// Token this device was broadcasting during the scan.
    pub self_token: String,
    /// Milliseconds the previous uplink delivery took.
    pub upload_duration_hint: u64,
    /// Seconds since the peer was first seen.
    pub contact_duration_seconds: u64,
    /// Cumulative close-contact seconds, including any open interval.
    pub close_contact_duration_seconds: u64,
    /// Exposure verdict.
    pub exposure_status: ExposureStatus,
}

impl OutputRecord {
    /// Whether this record raised the exposure signal.
    #[must_use]
    pub fn is_exposure(&self) -> bool {
        self.exposure_status == ExposureStatus::Exposure
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{}",
            self.timestamp,
            self.peer_address,
            self.signal_strength,
            self.self_token,
            self.upload_duration_hint,
            self.contact_duration_seconds,
            self.close_contact_duration_seconds,
            self.exposure_status
        )
    }
}

/// Errors from parsing a record line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRecordError {
    /// The line does not have the expected number of fields.
    #[error("expected 8 fields, found {0}")]
    FieldCount(usize),

    /// A numeric field did not parse.
    #[error("invalid {field}: '{value}'")]
    InvalidField {
        /// Column name.
        field: &'static str,
        /// Raw text.
        value: String,
    },

    /// The status column is neither NORMAL nor EXPOSURE.
    #[error("invalid exposure status: '{0}'")]
    InvalidStatus(String),
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, ParseRecordError> {
    value.parse().map_err(|_| ParseRecordError::InvalidField {
        field,
        value: value.to_string(),
    })
}

impl FromStr for OutputRecord {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        let [timestamp, peer, rssi, token, upload, contact, close, status] = fields[..] else {
            return Err(ParseRecordError::FieldCount(fields.len()));
        };

        Ok(Self {
            timestamp: parse_field("timestamp", timestamp)?,
            peer_address: peer.to_string(),
            signal_strength: parse_field("signalStrength", rssi)?,
            self_token: token.to_string(),
            upload_duration_hint: parse_field("uploadDurationHint", upload)?,
            contact_duration_seconds: parse_field("contactDurationSeconds", contact)?,
            close_contact_duration_seconds: parse_field("closeContactDurationSeconds", close)?,
            exposure_status: status.parse()?,
        })
    }
}
