//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The exclusive lock could not be acquired in time.
    #[error("file {path} is locked by another handle (waited {waited:?})")]
    Locked {
        /// The locked file.
        path: PathBuf,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A file that must not exist yet is already present.
    #[error("file already exists: {path}")]
    AlreadyExists {
        /// The conflicting path.
        path: PathBuf,
    },

    /// The backing file was removed out from under an open handle.
    #[error("backing file is missing: {path}")]
    Missing {
        /// The path the handle was opened with.
        path: PathBuf,
    },
}
