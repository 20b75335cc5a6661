//! Shared helpers for the Cubby benchmarks.

pub mod utils;
