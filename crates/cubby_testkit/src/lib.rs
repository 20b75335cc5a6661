//! # Cubby Testkit
//!
//! Test utilities for Cubby.
//!
//! This crate provides:
//! - Fixtures: managers over temporary directories
//! - Property-based generators for client operations
//! - The concurrent thrash harness that checks namespace isolation
//! - Crash simulation helpers that tear the tail of a store file
//! - Cross-crate integration tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cubby_testkit::prelude::*;
//!
//! #[test]
//! fn isolated() {
//!     with_temp_manager(|fixture| {
//!         let client = fixture.client("receiver", "filelog", "");
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
