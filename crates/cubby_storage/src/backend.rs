//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath a Cubby store file.
///
/// Backends never interpret the bytes they hold. The store appends whole
/// frames and reads them back by offset.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` makes every appended byte durable
/// - Backends must be `Send + Sync` so one store can serve many threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used by recovery to cut off a torn final frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Checks that the storage is still reachable.
    ///
    /// File backends report [`StorageError::Missing`](crate::StorageError::Missing)
    /// once their file or directory has been removed; an open descriptor
    /// would otherwise keep accepting writes that can never be found again.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage has gone away.
    fn check_present(&self) -> StorageResult<()> {
        Ok(())
    }
}
