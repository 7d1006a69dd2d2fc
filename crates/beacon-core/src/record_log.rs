//! Append-only CSV log of every record produced.
//!
//! The file starts with [`RECORD_HEADER`] and then holds one
//! [`OutputRecord`] per line. The log is written regardless of whether the
//! uplink succeeds, so it is the device-local history of every contact.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::record::{OutputRecord, RECORD_HEADER};
use crate::storage::{StorageError, StorageResult};

/// CSV record file with a single header line.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
}

impl RecordLog {
    /// Use the log at `path`, creating its parent directory if needed. The
    /// file itself is created on first append.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteError`] if the parent directory cannot
    /// be created.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record`, writing the header first if the file is new or
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteError`] if the file cannot be opened or
    /// written.
    pub fn append(&mut self, record: &OutputRecord) -> StorageResult<()> {
        let write_error = |source| StorageError::WriteError {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_error)?;
        let is_empty = file.metadata().map_err(write_error)?.len() == 0;

        let mut chunk = String::new();
        if is_empty {
            chunk.push_str(RECORD_HEADER);
            chunk.push('\n');
        }
        chunk.push_str(&record.to_string());
        chunk.push('\n');

        file.write_all(chunk.as_bytes()).map_err(write_error)?;
        debug!(path = %self.path.display(), peer = %record.peer_address, "Record logged");
        Ok(())
    }

    /// Entire file content, or an empty string if nothing was logged yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadError`] for anything other than a missing
    /// file.
    pub fn read_raw(&self) -> StorageResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(StorageError::ReadError {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Parse every logged record. Lines that do not parse are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadError`] if the file cannot be read.
    pub fn read_records(&self) -> StorageResult<Vec<OutputRecord>> {
        let content = self.read_raw()?;
        Ok(parse_lines(&content, &self.path))
    }
}

/// Parse record lines, skipping the header, blank lines and anything
/// malformed.
pub(crate) fn parse_lines(content: &str, origin: &Path) -> Vec<OutputRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty() && *line != RECORD_HEADER)
        .filter_map(|(index, line)| match line.parse::<OutputRecord>() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    path = %origin.display(),
                    line = index + 1,
                    error = %err,
                    "Skipping malformed record line"
                );
                None
            }
        })
        .collect()
}
