//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod verify;

use cubby_core::store::{Frame, FrameIterator, Index};
use cubby_core::{StoreStats, TransactionId, STORE_FILE};
use cubby_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};

/// Path of the store file in `dir`, which must already exist.
pub(crate) fn store_file(dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(STORE_FILE);
    if !path.is_file() {
        return Err(format!("No store file at {}", path.display()).into());
    }
    Ok(path)
}

/// Contents of a store file, read without taking the store lock.
#[derive(Debug)]
pub(crate) struct StoreScan {
    pub file_size: u64,
    pub frames: usize,
    pub last_txid: Option<TransactionId>,
    pub index: Index,
    pub torn_tail: Option<u64>,
}

impl StoreScan {
    /// Replays every frame of the file at `path` into an index.
    ///
    /// A torn tail is recorded, not repaired. Corruption is an error.
    pub(crate) fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let backend = FileBackend::open(path)?;
        let mut scan = Self {
            file_size: backend.size()?,
            frames: 0,
            last_txid: None,
            index: Index::new(),
            torn_tail: None,
        };

        let mut frames = FrameIterator::new(&backend)?;
        for entry in frames.by_ref() {
            let entry = entry?;
            scan.frames += 1;
            if let Frame::Commit { txid, ops } = &entry.frame {
                scan.last_txid = scan.last_txid.max(Some(*txid));
                for (op, span) in ops.iter().zip(entry.value_spans.iter().copied()) {
                    scan.index.apply(op, entry.offset, span);
                }
            }
        }
        scan.torn_tail = frames.torn_tail();
        Ok(scan)
    }

    pub(crate) fn stats(&self) -> StoreStats {
        StoreStats {
            file_size: self.file_size,
            live_bytes: self.index.live_bytes(),
            bucket_count: self.index.bucket_count(),
            key_count: self.index.key_count(),
        }
    }
}
