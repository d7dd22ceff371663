use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::store::RowStoreError;

/// Errors that can occur while synchronizing a file with its database row
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Backup of {path} failed: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Selection declined for {0}")]
    AmbiguityDeclined(PathBuf),

    #[error("Writing {table} failed: {source}")]
    RemoteWriteFailed {
        table: String,
        #[source]
        source: RowStoreError,
    },

    #[error("Reading {table} failed: {source}")]
    RemoteReadFailed {
        table: String,
        #[source]
        source: RowStoreError,
    },

    #[error("Writing local file {path} failed: {source}")]
    LocalWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No database row is known for {0}")]
    RemoteRecordMissing(PathBuf),

    #[error("{operation} did not finish within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// True for errors that mean the user chose not to proceed.
    pub fn is_declined(&self) -> bool {
        matches!(self, SyncError::AmbiguityDeclined(_))
    }
}

/// Extension trait for converting io::Error into more specific SyncError types
pub trait IoErrorExt {
    /// Convert an io::Error raised while reading `path`
    fn into_sync_error(self, path: impl AsRef<Path>) -> SyncError;

    /// Convert an io::Error raised while writing `path`
    fn into_local_write_error(self, path: impl AsRef<Path>) -> SyncError;
}

impl IoErrorExt for io::Error {
    fn into_sync_error(self, path: impl AsRef<Path>) -> SyncError {
        match self.kind() {
            io::ErrorKind::NotFound => SyncError::NotFound(path.as_ref().to_path_buf()),
            _ => SyncError::Io(self),
        }
    }

    fn into_local_write_error(self, path: impl AsRef<Path>) -> SyncError {
        SyncError::LocalWriteFailed {
            path: path.as_ref().to_path_buf(),
            source: self,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
