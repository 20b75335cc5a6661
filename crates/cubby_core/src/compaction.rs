//! Online store compaction.
//!
//! Compaction rewrites the live contents of a store into a fresh file and
//! swaps it in, dropping every overwritten and deleted record.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state: every bucket, including
//!   empty ones, and every live key survives with its latest value
//! - Output is deterministic (buckets and keys in sorted order), so
//!   compacting an already compact store leaves its size unchanged
//! - The staging file never outlives the call: it is either renamed into
//!   place or deleted
//! - On any failure before the rename the source store stays open and valid
//! - Once the compacted file replaces the source file, the source store is
//!   closed on every path, errors included

use crate::context::OpContext;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::store::{Frame, Op, Store};
use crate::types::TransactionId;
use cubby_storage::{FileBackend, StorageBackend};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Commit payload bytes that precede the operations.
const COMMIT_PREAMBLE: u64 = 12;

/// Outcome of a successful compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Store file size before compaction.
    pub source_size: u64,
    /// Store file size after compaction.
    pub compacted_size: u64,
    /// Buckets copied.
    pub buckets: usize,
    /// Key/value records copied.
    pub records: usize,
    /// Wall time spent.
    pub elapsed: Duration,
    /// Path of the compacted store file.
    pub destination: PathBuf,
}

impl CompactionReport {
    /// Bytes reclaimed, zero if the file did not shrink.
    #[must_use]
    pub fn reclaimed_bytes(&self) -> u64 {
        self.source_size.saturating_sub(self.compacted_size)
    }
}

/// Compacts `source` into `destination` and opens the result.
///
/// When `destination` is the source's own directory the compacted file
/// replaces the source file. Otherwise it becomes `<destination>/cubby.db`
/// and the source file is left as it was. Either way `source` is closed on
/// success and the returned store takes its place.
///
/// `timeout` bounds the whole operation including the wait for the writer
/// lock; zero means no limit. `max_txn_size` caps the payload of each
/// commit frame written to the new file; zero writes a single frame.
///
/// # Errors
///
/// - [`CoreError::DestinationExists`] if a different destination already
///   holds a store file
/// - [`CoreError::CompactionTimeout`] if `timeout` elapses
/// - [`CoreError::StoreClosed`] if `source` was closed or replaced meanwhile
/// - cancellation and I/O errors
pub fn compact_store(
    source: &Store,
    ctx: &OpContext,
    destination: &Path,
    timeout: Duration,
    max_txn_size: u64,
) -> CoreResult<(Store, CompactionReport)> {
    compact(source, ctx, destination, timeout, max_txn_size, Install::Destination)
}

/// Compacts `source` in place, writing the staging file in `staging_dir`.
///
/// The compacted file always replaces the source file and `staging_dir` is
/// left as it was found. A staging file on another file system is copied
/// next to the source before the final rename. Errors are those of
/// [`compact_store`], except that a store file already in `staging_dir` is
/// no obstacle.
///
/// # Errors
///
/// See [`compact_store`].
pub fn compact_store_via(
    source: &Store,
    ctx: &OpContext,
    staging_dir: &Path,
    timeout: Duration,
    max_txn_size: u64,
) -> CoreResult<(Store, CompactionReport)> {
    compact(source, ctx, staging_dir, timeout, max_txn_size, Install::OverSource)
}

/// Where the compacted file goes once it is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Install {
    /// `<destination>/cubby.db`, which is the source file when the
    /// destination is the source directory.
    Destination,
    /// Always over the source file.
    OverSource,
}

fn compact(
    source: &Store,
    ctx: &OpContext,
    destination: &Path,
    timeout: Duration,
    max_txn_size: u64,
    install: Install,
) -> CoreResult<(Store, CompactionReport)> {
    let started = Instant::now();
    let deadline = Deadline { started, timeout };
    ctx.check()?;

    let source_path = source
        .path()
        .ok_or_else(|| CoreError::invalid_operation("in-memory stores cannot be compacted"))?
        .to_path_buf();
    let source_dir = source_path.parent().unwrap_or_else(|| Path::new("."));

    let dest_dir = StoreDir::open(destination, false, 0)?;
    let same_dir = same_directory(source_dir, dest_dir.path())?;
    let replaces_source = same_dir || install == Install::OverSource;
    let (final_path, final_dir) = if replaces_source {
        (source_path.clone(), StoreDir::open(source_dir, false, 0)?)
    } else {
        let path = dest_dir.store_path();
        if path.exists() {
            return Err(CoreError::DestinationExists { path });
        }
        (path, dest_dir.clone())
    };

    let mut staging = StagingFile::create(&dest_dir)?;
    tracing::debug!(
        source = %source_path.display(),
        staging = %staging.path.display(),
        "compaction started"
    );

    let lock_ctx = match deadline.at() {
        Some(at) => ctx.clone().deadline(at),
        None => ctx.clone(),
    };
    let _writer = source
        .lock_writer(&lock_ctx)
        .map_err(|e| deadline.explain(e))?;
    if source.is_closed() {
        return Err(CoreError::StoreClosed);
    }

    let source_size = source.stats()?.file_size;
    let (buckets, records) = {
        let txn = source.begin_read()?;
        let mut writer = FrameWriter::new(staging.backend()?, max_txn_size);
        writer.write_header()?;

        let mut buckets = 0;
        let mut records = 0;
        for (bucket, keys) in txn.index().buckets() {
            deadline.check(ctx)?;
            writer.push(Op::CreateBucket {
                bucket: bucket.to_string(),
            })?;
            buckets += 1;

            for (key, loc) in keys {
                deadline.check(ctx)?;
                writer.push(Op::Put {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                    value: txn.read(*loc)?,
                })?;
                records += 1;
            }
        }
        writer.finish()?;
        (buckets, records)
    };

    deadline.check(ctx)?;
    let compacted_size = staging.seal()?;

    if same_dir || !replaces_source {
        fs::rename(&staging.path, &final_path)?;
        staging.disarm();
    } else {
        move_across(&mut staging, &final_dir, &final_path)?;
    }

    let store = take_over(source, &final_path, final_dir.sync(), replaces_source)?;

    let report = CompactionReport {
        source_size,
        compacted_size,
        buckets,
        records,
        elapsed: started.elapsed(),
        destination: final_path,
    };
    tracing::info!(
        path = %report.destination.display(),
        source_size = report.source_size,
        compacted_size = report.compacted_size,
        buckets = report.buckets,
        records = report.records,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "compaction finished"
    );

    Ok((store, report))
}

/// Renames a staging file from another directory onto `target`.
///
/// Renames fail across file systems, so on error the file is copied into
/// `target_dir` first and renamed from there.
fn move_across(staging: &mut StagingFile, target_dir: &StoreDir, target: &Path) -> CoreResult<()> {
    match fs::rename(&staging.path, target) {
        Ok(()) => {
            staging.disarm();
            return Ok(());
        }
        Err(e) => tracing::debug!(
            staging = %staging.path.display(),
            error = %e,
            "cannot rename staging file, copying it instead"
        ),
    }

    let mut copy = StagingFile::reserve(target_dir.staging_path());
    fs::copy(&staging.path, &copy.path)?;
    File::open(&copy.path)?.sync_all()?;
    fs::rename(&copy.path, target)?;
    copy.disarm();
    Ok(())
}

/// Opens the renamed file and retires `source`.
///
/// Runs after the rename, so it never returns with `source` still open
/// over a file that is no longer the store file. A failed directory sync
/// is only logged. When the file went to another directory and cannot be
/// opened, it is removed and `source` stays in service.
fn take_over(
    source: &Store,
    final_path: &Path,
    synced: CoreResult<()>,
    replaces_source: bool,
) -> CoreResult<Store> {
    if let Err(e) = synced {
        tracing::warn!(path = %final_path.display(), error = %e, "cannot sync directory after compaction");
    }

    let retire = || {
        if let Err(e) = source.close_locked() {
            tracing::warn!(path = ?source.path(), error = %e, "closing compacted store failed");
        }
    };

    if replaces_source {
        retire();
        return Store::open(final_path, source.lock_timeout(), source.fsync());
    }

    match Store::open(final_path, source.lock_timeout(), source.fsync()) {
        Ok(store) => {
            retire();
            Ok(store)
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(final_path) {
                tracing::warn!(
                    path = %final_path.display(),
                    error = %remove_err,
                    "cannot remove unopenable compacted file"
                );
            }
            Err(e)
        }
    }
}

fn same_directory(a: &Path, b: &Path) -> CoreResult<bool> {
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

/// Start time and limit of one compaction.
#[derive(Clone, Copy)]
struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    fn at(self) -> Option<Instant> {
        (!self.timeout.is_zero()).then(|| self.started + self.timeout)
    }

    fn expired(self) -> bool {
        !self.timeout.is_zero() && self.started.elapsed() >= self.timeout
    }

    fn check(self, ctx: &OpContext) -> CoreResult<()> {
        if self.expired() {
            return Err(self.timed_out());
        }
        ctx.check()
    }

    /// Reports an expired wait as a compaction timeout when ours ran out.
    fn explain(self, err: CoreError) -> CoreError {
        match err {
            CoreError::DeadlineExceeded if self.expired() => self.timed_out(),
            other => other,
        }
    }

    fn timed_out(self) -> CoreError {
        CoreError::CompactionTimeout {
            elapsed: self.started.elapsed(),
        }
    }
}

/// A staging file that deletes itself unless renamed into place.
struct StagingFile {
    path: PathBuf,
    backend: Option<FileBackend>,
    armed: bool,
}

impl StagingFile {
    fn create(dir: &StoreDir) -> CoreResult<Self> {
        let path = dir.staging_path();
        let backend = FileBackend::create_new(&path).map_err(CoreError::from_storage)?;
        Ok(Self {
            path,
            backend: Some(backend),
            armed: true,
        })
    }

    /// Guards a path that a staging file is about to be copied to.
    fn reserve(path: PathBuf) -> Self {
        Self {
            path,
            backend: None,
            armed: true,
        }
    }

    fn backend(&mut self) -> CoreResult<&mut FileBackend> {
        self.backend
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("staging file already sealed"))
    }

    /// Syncs and closes the file, returning its size.
    fn seal(&mut self) -> CoreResult<u64> {
        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| CoreError::invalid_operation("staging file already sealed"))?;
        backend.sync()?;
        Ok(backend.size()?)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        self.backend.take();
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "cannot remove staging file"
            ),
        }
    }
}

/// Groups operations into commit frames of bounded size.
struct FrameWriter<'a> {
    backend: &'a mut FileBackend,
    max_payload: u64,
    pending: Vec<Op>,
    pending_len: u64,
    next_txid: TransactionId,
}

impl<'a> FrameWriter<'a> {
    fn new(backend: &'a mut FileBackend, max_payload: u64) -> Self {
        Self {
            backend,
            max_payload,
            pending: Vec::new(),
            pending_len: COMMIT_PREAMBLE,
            next_txid: TransactionId::new(1),
        }
    }

    fn write_header(&mut self) -> CoreResult<()> {
        let header = Frame::header().encode()?;
        self.backend.append(&header.bytes)?;
        Ok(())
    }

    fn push(&mut self, op: Op) -> CoreResult<()> {
        let len = op.encoded_len() as u64;
        if self.max_payload > 0
            && !self.pending.is_empty()
            && self.pending_len + len > self.max_payload
        {
            self.flush()?;
        }
        self.pending_len += len;
        self.pending.push(op);
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let frame = Frame::Commit {
            txid: self.next_txid,
            ops: std::mem::take(&mut self.pending),
        };
        self.backend.append(&frame.encode()?.bytes)?;
        self.next_txid = self.next_txid.next();
        self.pending_len = COMMIT_PREAMBLE;
        Ok(())
    }

    fn finish(mut self) -> CoreResult<()> {
        self.flush()
    }
}
