//! Store statistics.
//!
//! Snapshots of how much of the store file is live data. The manager uses
//! them to decide on rebound compaction and the CLI prints them.

/// Size and content counters of one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Current size of the store file in bytes.
    pub file_size: u64,
    /// Bytes the live contents would take in a freshly compacted file.
    pub live_bytes: u64,
    /// Number of buckets.
    pub bucket_count: usize,
    /// Number of live keys across all buckets.
    pub key_count: usize,
}

impl StoreStats {
    /// Bytes held by overwritten or deleted records.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.file_size.saturating_sub(self.live_bytes)
    }

    /// Whether the rebound thresholds (in MiB) call for a compaction.
    ///
    /// True once the file exceeds `trigger_mib` while the live data is
    /// below `needed_mib`.
    #[must_use]
    pub fn exceeds_rebound(&self, needed_mib: u64, trigger_mib: u64) -> bool {
        const MIB: u64 = 1024 * 1024;
        self.file_size > trigger_mib.saturating_mul(MIB)
            && self.live_bytes < needed_mib.saturating_mul(MIB)
    }
}

/// Per-bucket counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStats {
    /// Bucket identifier.
    pub name: String,
    /// Number of live keys.
    pub keys: usize,
    /// Sum of key and value lengths.
    pub bytes: u64,
}
