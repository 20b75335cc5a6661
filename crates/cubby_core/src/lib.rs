//! # Cubby Core
//!
//! Durable, bucketed key-value state for the components of a pipeline.
//!
//! One [`StorageManager`] owns one directory, which holds exactly one store
//! file. Each component asks the manager for a [`Client`] under its
//! `(kind, name, discriminator)` namespace and gets a private bucket in that
//! file:
//!
//! - [`store`] - the single-file transactional engine and its recovery
//! - [`Namespace`] - collision-free bucket identifiers
//! - [`Client`] - get/set/delete/batch scoped to one bucket
//! - [`compact_store`] - online compaction with atomic swap
//! - [`OpContext`] - deadlines and cancellation for every call

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod compaction;
mod config;
mod context;
mod dir;
mod error;
mod manager;
mod namespace;
mod stats;
pub mod store;
mod types;

pub use client::{Client, Compact, OpKind, Operation, StorageClient};
pub use compaction::{compact_store, CompactionReport};
pub use config::{CompactionConfig, Config};
pub use context::{CancelHandle, OpContext};
pub use dir::{StoreDir, STORE_FILE, TEMP_PREFIX};
pub use error::{CoreError, CoreResult};
pub use manager::StorageManager;
pub use namespace::Namespace;
pub use stats::{BucketStats, StoreStats};
pub use store::{ReadTxn, Store, WriteTxn};
pub use types::TransactionId;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
