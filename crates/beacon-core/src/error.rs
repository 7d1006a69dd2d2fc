//! Unified error types for the beacon core library.
//!
//! Each module owns a narrow error type ([`IdentityError`](crate::identity::IdentityError),
//! [`LedgerError`](crate::ledger::LedgerError), [`StorageError`](crate::storage::StorageError),
//! [`RadioError`](crate::radio::RadioError), [`ConfigError`](crate::config::ConfigError)).
//! They all convert into [`BeaconError`], which the device loop uses to decide
//! whether a failure ends the process or only the current peer/record.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_marker(token: &str) -> Result<()> {
//!     if token.is_empty() {
//!         return Err(BeaconError::ConfigValidationError("marker is empty".into()));
//!     }
//!     Ok(())
//! }
//! # assert!(require_marker("").is_err());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// No radio adapter is available on this device.
    #[error("No radio adapter found. Ensure the Bluetooth controller is present and powered.")]
    RadioAdapterNotFound,

    /// A discovery scan could not be completed.
    #[error("Radio scan failed: {0}")]
    RadioScanFailed(String),

    /// The advertised payload could not be updated.
    #[error("Advertising failed: {0}")]
    AdvertiseFailed(String),

    // =========================================================================
    // IDENTITY ERRORS
    // =========================================================================
    /// The entropy source could not produce randomness for a new token.
    #[error("Entropy source unavailable, refusing to broadcast a weak identifier: {0}")]
    EntropyUnavailable(String),

    // =========================================================================
    // LEDGER ERRORS
    // =========================================================================
    /// The persisted contact ledger exists but cannot be loaded.
    #[error("Contact ledger unavailable at {}: {reason}", path.display())]
    LedgerUnavailable {
        /// Ledger file location.
        path: PathBuf,
        /// Why loading failed.
        reason: String,
    },

    /// A proximity update referenced a peer the ledger has never seen.
    #[error("Peer '{0}' is not in the contact ledger")]
    UnknownPeer(String),

    // =========================================================================
    // STORAGE ERRORS
    // =========================================================================
    /// Durable storage could not be mounted, even after a reformat attempt.
    #[error("Storage unavailable at {}", .0.display())]
    StorageUnavailable(PathBuf),

    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A persisted record line could not be parsed.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if this error is related to the radio collaborator.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::RadioAdapterNotFound | Self::RadioScanFailed(_) | Self::AdvertiseFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::IoError(_) | Self::StorageUnavailable(_)
        )
    }

    /// Returns `true` if the device must stop rather than keep cycling.
    ///
    /// Broadcasting without a fresh identity, or tracking contacts without
    /// the persisted ledger, would corrupt the data the device exists to
    /// collect.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EntropyUnavailable(_)
                | Self::AdvertiseFailed(_)
                | Self::LedgerUnavailable { .. }
                | Self::StorageUnavailable(_)
                | Self::RadioAdapterNotFound
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is likely to clear up on the next cycle.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RadioScanFailed(_) | Self::PersistenceError(_) | Self::MalformedRecord(_)
        )
    }

    /// Returns a machine-readable error code for structured logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RadioAdapterNotFound => "RADIO_ADAPTER_NOT_FOUND",
            Self::RadioScanFailed(_) => "RADIO_SCAN_FAILED",
            Self::AdvertiseFailed(_) => "ADVERTISE_FAILED",
            Self::EntropyUnavailable(_) => "ENTROPY_UNAVAILABLE",
            Self::LedgerUnavailable { .. } => "LEDGER_UNAVAILABLE",
            Self::UnknownPeer(_) => "UNKNOWN_PEER",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::MalformedRecord(_) => "MALFORMED_RECORD",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::radio::RadioError> for BeaconError {
    fn from(err: crate::radio::RadioError) -> Self {
        use crate::radio::RadioError;
        match err {
            RadioError::AdapterNotFound => Self::RadioAdapterNotFound,
            RadioError::ScanFailed { message } => Self::RadioScanFailed(message),
            RadioError::AdvertiseFailed { message } => Self::AdvertiseFailed(message),
        }
    }
}

impl From<crate::identity::IdentityError> for BeaconError {
    fn from(err: crate::identity::IdentityError) -> Self {
        use crate::identity::IdentityError;
        match err {
            IdentityError::EntropyUnavailable { message } => Self::EntropyUnavailable(message),
            IdentityError::Advertise(radio) => radio.into(),
        }
    }
}

impl From<crate::ledger::LedgerError> for BeaconError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        use crate::ledger::LedgerError;
        match err {
            LedgerError::Unavailable { path, reason } => Self::LedgerUnavailable { path, reason },
            LedgerError::UnknownPeer { address } => Self::UnknownPeer(address),
            LedgerError::PersistFailed { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            LedgerError::Serialize(e) => Self::PersistenceError(e.to_string()),
        }
    }
}

impl From<crate::storage::StorageError> for BeaconError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::Unavailable { path } => Self::StorageUnavailable(path),
            StorageError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            StorageError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
        }
    }
}

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::NoConfigDirectory => {
                Self::ConfigParseError("Cannot determine config directory".into())
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::record::ParseRecordError> for BeaconError {
    fn from(err: crate::record::ParseRecordError) -> Self {
        Self::MalformedRecord(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
