//! Crash simulation for Cubby store files.
//!
//! An interrupted append leaves the store file with a partial final frame.
//! These helpers produce such files on purpose so tests can check that
//! reopening discards exactly the torn tail and nothing before it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cubby_testkit::crash::{tear_tail, TornWrite};
//!
//! tear_tail(&store_path, TornWrite::PartialFrame);
//! // reopen and verify committed data
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Ways an append can be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TornWrite {
    /// Only part of a frame header made it to disk.
    PartialHeader,
    /// A full header whose payload was cut short.
    PartialFrame,
    /// The file was extended but the new bytes were never written.
    ZeroFill,
    /// The last committed frame lost its final byte.
    ChoppedLastFrame,
}

impl TornWrite {
    /// Every kind of torn write.
    pub const ALL: [TornWrite; 4] = [
        TornWrite::PartialHeader,
        TornWrite::PartialFrame,
        TornWrite::ZeroFill,
        TornWrite::ChoppedLastFrame,
    ];
}

/// Damages the end of the file at `path` the way `kind` describes.
pub fn tear_tail(path: &Path, kind: TornWrite) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open store file");

    match kind {
        TornWrite::PartialHeader => file.write_all(b"CBYF\x01").expect("write failed"),
        TornWrite::PartialFrame => {
            let mut frame = Vec::new();
            frame.extend_from_slice(b"CBYF");
            frame.extend_from_slice(&1u16.to_le_bytes());
            frame.push(2);
            frame.extend_from_slice(&64u32.to_le_bytes());
            frame.extend_from_slice(&[0xAB; 20]);
            file.write_all(&frame).expect("write failed");
        }
        TornWrite::ZeroFill => file.write_all(&[0u8; 4096]).expect("write failed"),
        TornWrite::ChoppedLastFrame => {
            let len = file.metadata().expect("stat failed").len();
            file.set_len(len - 1).expect("truncate failed");
        }
    }
    file.sync_all().expect("sync failed");
}
