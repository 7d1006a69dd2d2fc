//! Beacon configuration management.
//!
//! Handles loading, saving, and validating the beacon configuration:
//! - Identity token format (protocol marker, token length)
//! - Scan window, noise floor and cycle interval
//! - Close-contact and exposure thresholds
//! - Uplink collector address and retry policy
//! - Storage file locations
//!
//! Every field has a default matching the deployed firmware, so an absent
//! config file yields a working beacon. Values are layered: TOML file first,
//! then `BEACON__<SECTION>__<FIELD>` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PeerObservation;

/// Environment variable prefix for overrides (`BEACON__SCAN__MIN_RSSI=-85`).
pub const ENV_PREFIX: &str = "BEACON";

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,16}$").expect("marker pattern is valid"));

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// No platform config directory could be determined.
    #[error("cannot determine config directory")]
    NoConfigDirectory,

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main beacon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Broadcast identity format.
    pub identity: IdentityConfig,
    /// Discovery scan behaviour.
    pub scan: ScanConfig,
    /// Contact and exposure thresholds.
    pub exposure: ExposureConfig,
    /// Record uplink.
    pub uplink: UplinkConfig,
    /// File locations.
    pub storage: StorageConfig,
    /// Radio adapter options.
    pub radio: RadioConfig,
}

/// Broadcast identity format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed prefix every token of this beacon family starts with.
    pub marker: String,
    /// Number of random characters after the marker.
    pub token_length: usize,
    /// Local name advertised alongside the token.
    pub device_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            marker: "CTB".to_string(),
            token_length: 8,
            device_name: "ESP32_ContactTracer".to_string(),
        }
    }
}

/// Discovery scan behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Length of one discovery window in seconds.
    pub window_secs: u64,
    /// Noise floor: weaker observations never reach the ledger.
    pub min_rssi: i16,
    /// Pause between cycles in seconds.
    pub cycle_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_secs: 15,
            min_rssi: -90,
            cycle_interval_secs: 10,
        }
    }
}

impl ScanConfig {
    /// Scan window as a [`Duration`].
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Inter-cycle pause as a [`Duration`].
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Contact and exposure thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Observations at or above this strength count as close contact.
    pub close_contact_rssi: i16,
    /// Close-contact seconds at which a peer becomes an exposure.
    pub exposure_duration_secs: u64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            close_contact_rssi: -60,
            exposure_duration_secs: 300,
        }
    }
}

/// Record uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Collector `host:port`.
    pub collector: String,
    /// Local UDP port to bind, 0 for ephemeral.
    pub bind_port: u16,
    /// Transmissions per record before giving up.
    pub max_attempts: u32,
    /// How long each attempt waits for the acknowledgment.
    pub ack_timeout_ms: u64,
    /// How often the channel is polled while waiting.
    pub poll_interval_ms: u64,
    /// Exact acknowledgment datagram.
    pub ack_token: String,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            collector: "127.0.0.1:4210".to_string(),
            bind_port: 0,
            max_attempts: 3,
            ack_timeout_ms: 5000,
            poll_interval_ms: 10,
            ack_token: "ACK".to_string(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory; the platform default when unset.
    pub data_dir: Option<PathBuf>,
    /// Contact record log file name.
    pub record_file: String,
    /// Contact ledger file name.
    pub ledger_file: String,
    /// Pending-uplink queue file name.
    pub outbox_file: String,
    /// Maximum records kept in the outbox.
    pub outbox_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            record_file: "data.csv".to_string(),
            ledger_file: "ledger.json".to_string(),
            outbox_file: "outbox.csv".to_string(),
            outbox_capacity: 500,
        }
    }
}

/// Radio adapter options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Peers reported by the mock radio on every scan.
    pub mock_peers: Vec<PeerObservation>,
}

impl BeaconConfig {
    /// Load configuration from `path` (if it exists) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform default location.
    ///
    /// # Errors
    ///
    /// See [`BeaconConfig::load`].
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&Self::default_path()?)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory exists on this platform.
    pub fn default_path() -> ConfigResult<PathBuf> {
        // On the device: /etc/beacon/config.toml
        // For development: ~/.config/beacon/config.toml
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/beacon/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "beacon")
                .ok_or(ConfigError::NoConfigDirectory)?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }

    /// Check every field, returning all violations at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &'static str, message: String| {
            errors.push(ConfigError::ValidationError { field, message });
        };

        if !MARKER_RE.is_match(&self.identity.marker) {
            fail(
                "identity.marker",
                format!(
                    "'{}' must be 1-16 ASCII letters, digits or underscores",
                    self.identity.marker
                ),
            );
        }
        if !(4..=32).contains(&self.identity.token_length) {
            fail(
                "identity.token_length",
                format!("{} is outside 4..=32", self.identity.token_length),
            );
        }
        if self.scan.window_secs == 0 {
            fail("scan.window_secs", "must be at least 1 second".into());
        }
        if self.scan.min_rssi > self.exposure.close_contact_rssi {
            fail(
                "scan.min_rssi",
                format!(
                    "noise floor {} dBm is above the close-contact threshold {} dBm",
                    self.scan.min_rssi, self.exposure.close_contact_rssi
                ),
            );
        }
        if self.exposure.exposure_duration_secs == 0 {
            fail("exposure.exposure_duration_secs", "must be positive".into());
        }
        if self.uplink.collector.trim().is_empty() {
            fail("uplink.collector", "collector address is empty".into());
        }
        if self.uplink.max_attempts == 0 {
            fail("uplink.max_attempts", "at least one attempt is required".into());
        }
        if self.uplink.ack_token.is_empty() || self.uplink.ack_token.len() > 16 {
            fail(
                "uplink.ack_token",
                "acknowledgment token must be 1-16 bytes".into(),
            );
        }
        if self.uplink.poll_interval_ms == 0
            || self.uplink.poll_interval_ms > self.uplink.ack_timeout_ms
        {
            fail(
                "uplink.poll_interval_ms",
                format!(
                    "{} ms must be positive and no longer than the ack timeout ({} ms)",
                    self.uplink.poll_interval_ms, self.uplink.ack_timeout_ms
                ),
            );
        }
        if self.storage.outbox_capacity == 0 {
            fail("storage.outbox_capacity", "must hold at least one record".into());
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware_constants() {
        let config = BeaconConfig::default();
        assert_eq!(config.scan.window_secs, 15);
        assert_eq!(config.scan.min_rssi, -90);
        assert_eq!(config.identity.token_length, 8);
        assert_eq!(config.uplink.max_attempts, 3);
        assert_eq!(config.uplink.ack_timeout_ms, 5000);
        assert_eq!(config.uplink.ack_token, "ACK");
        assert_eq!(config.exposure.exposure_duration_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BeaconConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BeaconConfig::default());
    }

    #[test]
    fn test_save_then_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = BeaconConfig::default();
        config.exposure.exposure_duration_secs = 900;
        config.uplink.collector = "10.0.0.2:9000".into();
        config.save(&path).unwrap();

        let loaded = BeaconConfig::load(&path).unwrap();
        assert_eq!(loaded.exposure.exposure_duration_secs, 900);
        assert_eq!(loaded.uplink.collector, "10.0.0.2:9000");

        std::fs::write(&path, "[scan]\nmin_rssi = -85\n").unwrap();
        let partial = BeaconConfig::load(&path).unwrap();
        assert_eq!(partial.scan.min_rssi, -85);
        assert_eq!(partial.scan.window_secs, 15);
    }

    #[test]
    fn test_mock_peers_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[radio.mock_peers]]
address = "AA:BB:CC:DD:EE:01"
signal_strength = -55
advertised_token = "CTB7Q2M9K1Z"
"#,
        )
        .unwrap();

        let config = BeaconConfig::load(&path).unwrap();
        assert_eq!(config.radio.mock_peers.len(), 1);
        assert_eq!(config.radio.mock_peers[0].signal_strength, -55);
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = BeaconConfig::default();
        config.identity.marker = "bad marker!".into();
        config.uplink.max_attempts = 0;
        config.scan.min_rssi = -40;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = BeaconConfig::default();
        config.uplink.ack_token = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError {
                field: "uplink.ack_token",
                ..
            })
        ));
    }
}
