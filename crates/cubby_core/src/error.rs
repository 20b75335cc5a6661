//! Error types for Cubby core.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Cubby core operations.
///
/// A missing key is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cubby_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration or the configured directory is unusable.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Another handle holds the store file lock.
    #[error("store {path} is locked by another handle")]
    StoreLocked {
        /// The store file.
        path: PathBuf,
    },

    /// The store file or its directory vanished after the store was opened.
    #[error("store {path} is no longer available")]
    StoreUnavailable {
        /// The store file.
        path: PathBuf,
    },

    /// The store has been shut down or replaced by compaction.
    #[error("store is closed")]
    StoreClosed,

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,

    /// The manager has not been started, or has been shut down.
    #[error("storage manager is not started")]
    NotStarted,

    /// The store file is corrupted.
    #[error("store corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A bucket identifier could not be decoded into a namespace.
    #[error("invalid namespace {raw:?}: {message}")]
    InvalidNamespace {
        /// The offending identifier.
        raw: String,
        /// Why it was rejected.
        message: String,
    },

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed before it could complete.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Compaction did not finish within its timeout.
    #[error("compaction timed out after {elapsed:?}")]
    CompactionTimeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The compaction destination already holds a store file.
    #[error("compaction destination {path} already exists")]
    DestinationExists {
        /// The path that would have been overwritten.
        path: PathBuf,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid namespace error.
    pub fn invalid_namespace(raw: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            raw: raw.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for configuration and directory problems, which are
    /// fatal to the manager and not worth retrying.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if the error came from a cancelled or expired context.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Maps backend-level lock and missing-file errors to their core variants.
    pub(crate) fn from_storage(err: cubby_storage::StorageError) -> Self {
        use cubby_storage::StorageError;
        match err {
            StorageError::Locked { path, .. } => Self::StoreLocked { path },
            StorageError::Missing { path } => Self::StoreUnavailable { path },
            StorageError::AlreadyExists { path } => Self::DestinationExists { path },
            other => Self::Storage(other),
        }
    }
}
