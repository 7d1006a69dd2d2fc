//! Durable storage primitives.
//!
//! - [`mount`] probes the data directory at startup and attempts one
//!   reformat before declaring storage unavailable
//! - [`write_atomic`] replaces a file via temp-file + rename so a power cut
//!   leaves either the old or the new content, never a torn file
//! - [`default_data_dir`] resolves the platform data directory

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

const PROBE_FILE: &str = ".storage_probe";
const PROBE_CONTENT: &[u8] = b"beacon storage probe\n";

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The data directory is unusable even after a reformat attempt.
    #[error("storage unavailable at {}", path.display())]
    Unavailable {
        /// Data directory.
        path: PathBuf,
    },

    /// A file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// What [`mount`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReport {
    /// The mounted directory.
    pub data_dir: PathBuf,
    /// Whether the directory had to be wiped to become usable.
    pub reformatted: bool,
    /// Regular files present after mounting.
    pub file_count: usize,
    /// Bytes used by those files.
    pub used_bytes: u64,
}

/// Get the default data directory.
///
/// On the device: `/var/lib/beacon/`
/// For development: the platform data dir for `beacon`
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Make sure `data_dir` can be written and read back.
///
/// A failed probe wipes and recreates the directory once. If the second
/// probe also fails the device cannot keep a ledger and must not start.
///
/// # Errors
///
/// Returns [`StorageError::Unavailable`] when both probes fail.
pub fn mount(data_dir: &Path) -> StorageResult<StorageReport> {
    let reformatted = match probe(data_dir) {
        Ok(()) => false,
        Err(err) => {
            warn!(dir = %data_dir.display(), error = %err, "Storage probe failed, reformatting");
            if let Err(err) = wipe(data_dir) {
                error!(dir = %data_dir.display(), error = %err, "Reformat could not clear data directory");
            }
            if let Err(err) = probe(data_dir) {
                error!(dir = %data_dir.display(), error = %err, "Storage unavailable after reformat");
                return Err(StorageError::Unavailable {
                    path: data_dir.to_path_buf(),
                });
            }
            true
        }
    };

    let (file_count, used_bytes) = usage(data_dir);
    info!(
        dir = %data_dir.display(),
        file_count,
        used_bytes,
        reformatted,
        "Storage mounted"
    );

    Ok(StorageReport {
        data_dir: data_dir.to_path_buf(),
        reformatted,
        file_count,
        used_bytes,
    })
}

fn wipe(data_dir: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(data_dir) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(data_dir),
        Ok(_) => fs::remove_file(data_dir),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn probe(data_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let probe = data_dir.join(PROBE_FILE);
    fs::write(&probe, PROBE_CONTENT)?;
    let read_back = fs::read(&probe);
    fs::remove_file(&probe)?;
    if read_back? == PROBE_CONTENT {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "probe content did not read back",
        ))
    }
}

fn usage(data_dir: &Path) -> (usize, u64) {
    fs::read_dir(data_dir)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter_map(|entry| entry.metadata().ok())
                .filter(fs::Metadata::is_file)
                .fold((0, 0), |(count, bytes), meta| (count + 1, bytes + meta.len()))
        })
        .unwrap_or_default()
}

/// Replace `path` with `contents` atomically.
///
/// # Errors
///
/// Returns the underlying I/O error if the temp file cannot be written,
/// synced or renamed into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("beacon");

        let report = mount(&data_dir).unwrap();

        assert!(data_dir.is_dir());
        assert!(!report.reformatted);
        assert_eq!(report.file_count, 0);
        assert!(!data_dir.join(PROBE_FILE).exists());
    }

    #[test]
    fn test_mount_reports_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.csv"), b"0123456789").unwrap();

        let report = mount(dir.path()).unwrap();

        assert_eq!(report.file_count, 1);
        assert_eq!(report.used_bytes, 10);
    }

    #[test]
    fn test_mount_reformats_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("beacon");
        fs::write(&data_dir, b"not a directory").unwrap();

        let report = mount(&data_dir).unwrap();

        assert!(report.reformatted);
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_mount_fails_when_parent_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"regular file").unwrap();

        let result = mount(&blocker.join("beacon"));

        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_default_data_dir_is_valid_path() {
        assert!(!default_data_dir().as_os_str().is_empty());
    }
}
