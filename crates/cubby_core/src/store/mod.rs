//! The embedded single-file store.
//!
//! A store is an append-only sequence of checksummed frames (see
//! [`frame`]). Opening a store replays every frame into an in-memory
//! [`Index`] of value locations; values stay on disk and are read by offset.
//!
//! ## Concurrency
//!
//! - one writer at a time, serialized on the store's writer mutex
//! - readers only take a shared lock on the index and never block on writers
//! - the index is updated after the commit frame is durable, so readers
//!   never observe a write that could still be lost

mod frame;
mod index;
mod iterator;

pub use frame::{EncodedFrame, Frame, FrameType, Op, ValueSpan, FORMAT_VERSION};
pub use index::{Index, ValueLoc};
pub use iterator::{FrameEntry, FrameIterator};

use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::stats::{BucketStats, StoreStats};
use crate::types::TransactionId;
use cubby_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How long a writer waits on the mutex before re-checking its context.
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A single-file transactional store.
pub struct Store {
    path: Option<PathBuf>,
    /// `None` once the store has been closed.
    backend: RwLock<Option<Box<dyn StorageBackend>>>,
    index: RwLock<Index>,
    write_lock: Mutex<()>,
    next_txid: AtomicU64,
    fsync: bool,
    lock_timeout: Duration,
}

impl Store {
    /// Opens or creates the store file at `path`.
    ///
    /// The file is locked exclusively, waiting up to `lock_timeout` for a
    /// previous holder to go away.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreLocked`] if the lock is not acquired in time,
    /// or a corruption error if the file cannot be recovered.
    pub fn open(path: &Path, lock_timeout: Duration, fsync: bool) -> CoreResult<Self> {
        let backend = FileBackend::open(path).map_err(CoreError::from_storage)?;
        backend
            .lock_exclusive(lock_timeout)
            .map_err(CoreError::from_storage)?;
        Self::recover(Some(path.to_path_buf()), Box::new(backend), fsync, lock_timeout)
    }

    /// Opens a store that lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial header frame cannot be written.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()))
    }

    /// Opens a store over an arbitrary backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend contents cannot be recovered.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::recover(None, backend, true, Duration::ZERO)
    }

    fn recover(
        path: Option<PathBuf>,
        mut backend: Box<dyn StorageBackend>,
        fsync: bool,
        lock_timeout: Duration,
    ) -> CoreResult<Self> {
        let (index, last_txid, valid_end, torn_at) = {
            let mut iter = FrameIterator::new(backend.as_ref())?;
            let mut index = Index::new();
            let mut last_txid = 0u64;
            let mut saw_header = false;

            for entry in iter.by_ref() {
                let entry = entry?;
                match entry.frame {
                    Frame::Header { format_version } => {
                        if entry.offset != 0 {
                            return Err(CoreError::corruption(format!(
                                "header frame at offset {}",
                                entry.offset
                            )));
                        }
                        if format_version.0 != FORMAT_VERSION.0 {
                            return Err(CoreError::corruption(format!(
                                "unsupported store format {}.{}",
                                format_version.0, format_version.1
                            )));
                        }
                        saw_header = true;
                    }
                    Frame::Commit { txid, ops } => {
                        if !saw_header {
                            return Err(CoreError::corruption("commit frame before header"));
                        }
                        last_txid = last_txid.max(txid.as_u64());
                        for (op, span) in ops.iter().zip(entry.value_spans) {
                            index.apply(op, entry.offset, span);
                        }
                    }
                }
            }

            (index, last_txid, iter.valid_end(), iter.torn_tail())
        };

        if let Some(offset) = torn_at {
            let size = backend.size()?;
            tracing::warn!(
                path = ?path,
                offset,
                discarded = size - offset,
                "discarding torn tail of store file"
            );
            backend.truncate(valid_end)?;
        }

        if valid_end == 0 {
            let header = Frame::header().encode()?;
            backend.append(&header.bytes)?;
            backend.sync()?;
            tracing::debug!(path = ?path, "initialized new store file");
        }

        tracing::debug!(
            path = ?path,
            buckets = index.bucket_count(),
            keys = index.key_count(),
            "store recovered"
        );

        Ok(Self {
            path,
            backend: RwLock::new(Some(backend)),
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
            next_txid: AtomicU64::new(last_txid + 1),
            fsync,
            lock_timeout,
        })
    }

    /// Path of the store file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether commits are fsynced.
    #[must_use]
    pub fn fsync(&self) -> bool {
        self.fsync
    }

    /// How long [`open`](Self::open) waited for the file lock.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Returns true once the store has been closed or replaced.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.backend.read().is_none()
    }

    /// Checks that the backing file is still reachable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`] or [`CoreError::StoreUnavailable`].
    pub fn check_available(&self) -> CoreResult<()> {
        let backend = self.backend.read();
        let backend = backend.as_ref().ok_or(CoreError::StoreClosed)?;
        backend.check_present().map_err(CoreError::from_storage)
    }

    /// Starts a read transaction over the committed state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`] if the store is closed.
    pub fn begin_read(&self) -> CoreResult<ReadTxn<'_>> {
        if self.is_closed() {
            return Err(CoreError::StoreClosed);
        }
        Ok(ReadTxn {
            store: self,
            index: self.index.read(),
        })
    }

    /// Starts the single write transaction.
    ///
    /// Waits for the writer mutex while `ctx` allows it.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if `ctx` ends first, or
    /// [`CoreError::StoreClosed`] if the store is closed.
    pub fn begin_write(&self, ctx: &OpContext) -> CoreResult<WriteTxn<'_>> {
        let guard = self.lock_writer(ctx)?;
        if self.is_closed() {
            return Err(CoreError::StoreClosed);
        }
        Ok(WriteTxn {
            store: self,
            _guard: guard,
            ops: Vec::new(),
            overlay: HashMap::new(),
            new_buckets: BTreeSet::new(),
        })
    }

    /// Acquires the writer mutex, polling `ctx` while waiting.
    pub(crate) fn lock_writer(&self, ctx: &OpContext) -> CoreResult<MutexGuard<'_, ()>> {
        loop {
            ctx.check()?;
            let wait = ctx
                .remaining()
                .map_or(WRITER_POLL_INTERVAL, |left| left.min(WRITER_POLL_INTERVAL));
            if let Some(guard) = self.write_lock.try_lock_for(wait) {
                return Ok(guard);
            }
        }
    }

    fn read_value(&self, loc: ValueLoc) -> CoreResult<Vec<u8>> {
        let backend = self.backend.read();
        let backend = backend.as_ref().ok_or(CoreError::StoreClosed)?;
        Ok(backend.read_at(loc.offset, loc.len as usize)?)
    }

    /// Appends one commit frame and publishes it to the index.
    ///
    /// The caller holds the writer mutex.
    fn commit_ops(&self, ops: Vec<Op>) -> CoreResult<()> {
        let txid = TransactionId::new(self.next_txid.load(Ordering::SeqCst));
        let frame = Frame::Commit { txid, ops };
        let encoded = frame.encode()?;

        let offset = {
            let mut backend = self.backend.write();
            let backend = backend.as_mut().ok_or(CoreError::StoreClosed)?;
            backend.check_present().map_err(CoreError::from_storage)?;

            let start = backend.size()?;
            let written = backend.append(&encoded.bytes).and_then(|offset| {
                if self.fsync {
                    backend.sync()?;
                } else {
                    backend.flush()?;
                }
                Ok(offset)
            });

            match written {
                Ok(offset) => offset,
                Err(e) => {
                    if let Err(truncate_err) = backend.truncate(start) {
                        tracing::warn!(
                            path = ?self.path,
                            error = %truncate_err,
                            "failed to roll back partial commit"
                        );
                    }
                    return Err(CoreError::from_storage(e));
                }
            }
        };

        self.next_txid.store(txid.next().as_u64(), Ordering::SeqCst);

        let Frame::Commit { ops, .. } = frame else {
            return Ok(());
        };
        let mut index = self.index.write();
        for (op, span) in ops.iter().zip(encoded.value_spans) {
            index.apply(op, offset, span);
        }

        tracing::debug!(
            %txid,
            ops = ops.len(),
            bytes = encoded.bytes.len(),
            "committed"
        );
        Ok(())
    }

    /// Current size and content counters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`] if the store is closed.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let index = self.index.read();
        let file_size = {
            let backend = self.backend.read();
            backend.as_ref().ok_or(CoreError::StoreClosed)?.size()?
        };
        Ok(StoreStats {
            file_size,
            live_bytes: index.live_bytes(),
            bucket_count: index.bucket_count(),
            key_count: index.key_count(),
        })
    }

    /// Per-bucket counters, in bucket order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`] if the store is closed.
    pub fn bucket_stats(&self) -> CoreResult<Vec<BucketStats>> {
        let txn = self.begin_read()?;
        Ok(txn
            .index()
            .buckets()
            .map(|(name, keys)| BucketStats {
                name: name.to_string(),
                keys: keys.len(),
                bytes: keys
                    .iter()
                    .map(|(key, loc)| key.len() as u64 + u64::from(loc.len))
                    .sum(),
            })
            .collect())
    }

    /// Syncs and closes the store. Idempotent.
    ///
    /// Waits for an in-flight writer to finish. Dropping the backend
    /// releases the file lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the store is closed anyway.
    pub fn close(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.close_locked()
    }

    /// Closes the store while the caller already holds the writer mutex.
    pub(crate) fn close_locked(&self) -> CoreResult<()> {
        let Some(mut backend) = self.backend.write().take() else {
            return Ok(());
        };
        let result = backend.sync();
        drop(backend);
        tracing::debug!(path = ?self.path, "store closed");
        Ok(result?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("fsync", &self.fsync)
            .finish_non_exhaustive()
    }
}

/// A read transaction: a consistent view of the committed index.
///
/// Holding one blocks index publication by writers, so keep it short.
pub struct ReadTxn<'a> {
    store: &'a Store,
    index: RwLockReadGuard<'a, Index>,
}

impl ReadTxn<'_> {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read from the file.
    pub fn get(&self, bucket: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.index.get(bucket, key) {
            Some(loc) => self.store.read_value(loc).map(Some),
            None => Ok(None),
        }
    }

    /// Returns true if the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.index.has_bucket(bucket)
    }

    /// The committed index.
    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Reads the value at a location taken from [`index`](Self::index).
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read from the file.
    pub fn read(&self, loc: ValueLoc) -> CoreResult<Vec<u8>> {
        self.store.read_value(loc)
    }
}

/// The single active write transaction.
///
/// Operations are buffered and become visible to other transactions only
/// when [`commit`](Self::commit) succeeds. Reads through the transaction see
/// its own buffered writes. Dropping it without committing discards them.
pub struct WriteTxn<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
    ops: Vec<Op>,
    overlay: HashMap<(String, Vec<u8>), Option<Vec<u8>>>,
    new_buckets: BTreeSet<String>,
}

impl WriteTxn<'_> {
    fn bucket_exists(&self, bucket: &str) -> bool {
        self.new_buckets.contains(bucket) || self.store.index.read().has_bucket(bucket)
    }

    fn require_bucket(&self, bucket: &str) -> CoreResult<()> {
        if self.bucket_exists(bucket) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "bucket {bucket:?} does not exist"
            )))
        }
    }

    /// Creates a bucket unless it already exists.
    pub fn create_bucket(&mut self, bucket: &str) {
        if !self.bucket_exists(bucket) {
            self.new_buckets.insert(bucket.to_string());
            self.ops.push(Op::CreateBucket {
                bucket: bucket.to_string(),
            });
        }
    }

    /// Reads a value, including writes buffered in this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read from the file.
    pub fn get(&self, bucket: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        if let Some(buffered) = self.overlay.get(&(bucket.to_string(), key.to_vec())) {
            return Ok(buffered.clone());
        }
        let loc = self.store.index.read().get(bucket, key);
        match loc {
            Some(loc) => self.store.read_value(loc).map(Some),
            None => Ok(None),
        }
    }

    /// Buffers an insert or overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the bucket does not exist.
    pub fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.require_bucket(bucket)?;
        self.ops.push(Op::Put {
            bucket: bucket.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.overlay
            .insert((bucket.to_string(), key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    /// Buffers a delete. Returns false, buffering nothing, if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the bucket does not exist.
    pub fn delete(&mut self, bucket: &str, key: &[u8]) -> CoreResult<bool> {
        self.require_bucket(bucket)?;
        if self.get(bucket, key)?.is_none() {
            return Ok(false);
        }
        self.ops.push(Op::Delete {
            bucket: bucket.to_string(),
            key: key.to_vec(),
        });
        self.overlay.insert((bucket.to_string(), key.to_vec()), None);
        Ok(true)
    }

    /// Returns true if nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Writes the buffered operations as one commit frame.
    ///
    /// An empty transaction writes nothing. `ctx` is checked once more
    /// before anything touches the file.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error, or the I/O error that prevented the
    /// frame from becoming durable. On error nothing is applied.
    pub fn commit(self, ctx: &OpContext) -> CoreResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        ctx.check()?;
        self.store.commit_ops(self.ops)
    }
}
