//! In-memory index of the store file.
//!
//! Maps every bucket and key to the location of its latest value in the
//! file. Values themselves stay on disk and are read on demand.

use crate::store::frame::{Op, ValueSpan};
use std::collections::BTreeMap;

/// Absolute location of a value in the store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLoc {
    /// File offset of the first value byte.
    pub offset: u64,
    /// Value length.
    pub len: u32,
}

/// Bucket → key → value location.
#[derive(Debug, Default)]
pub struct Index {
    buckets: BTreeMap<String, BTreeMap<Vec<u8>, ValueLoc>>,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one committed operation.
    ///
    /// `frame_offset` and `span` locate a `Put` value in the file. Writes to
    /// unknown buckets are ignored; the writer never produces them.
    pub fn apply(&mut self, op: &Op, frame_offset: u64, span: Option<ValueSpan>) {
        match op {
            Op::CreateBucket { bucket } => {
                self.buckets.entry(bucket.clone()).or_default();
            }
            Op::Put { bucket, key, .. } => {
                if let (Some(keys), Some(span)) = (self.buckets.get_mut(bucket), span) {
                    keys.insert(
                        key.clone(),
                        ValueLoc {
                            offset: frame_offset + span.offset,
                            len: span.len,
                        },
                    );
                }
            }
            Op::Delete { bucket, key } => {
                if let Some(keys) = self.buckets.get_mut(bucket) {
                    keys.remove(key);
                }
            }
        }
    }

    /// Returns true if the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<ValueLoc> {
        self.buckets.get(bucket)?.get(key).copied()
    }

    /// Iterates buckets in identifier order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &BTreeMap<Vec<u8>, ValueLoc>)> {
        self.buckets.iter().map(|(name, keys)| (name.as_str(), keys))
    }

    /// Number of buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live keys across all buckets.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    /// Size the live contents would occupy as operations in a fresh file.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.buckets
            .iter()
            .map(|(name, keys)| {
                let bucket_op = 3 + name.len() as u64;
                let records: u64 = keys
                    .iter()
                    .map(|(key, loc)| bucket_op + 8 + key.len() as u64 + u64::from(loc.len))
                    .sum();
                bucket_op + records
            })
            .sum()
    }
}
