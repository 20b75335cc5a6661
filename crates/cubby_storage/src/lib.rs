//! # Cubby Storage
//!
//! Byte-store backends underneath the Cubby store file.
//!
//! Backends are **opaque byte stores**: they read, append, sync and truncate
//! bytes and know nothing about frames, buckets or keys. `cubby_core` owns all
//! interpretation of the file contents.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, with an advisory exclusive lock
//! - [`InMemoryBackend`] - for tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use cubby_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"checkpoint").unwrap();
//! assert_eq!(backend.read_at(offset, 10).unwrap(), b"checkpoint");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::{FailSwitch, InMemoryBackend};
