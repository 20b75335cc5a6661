//! Compact command implementation.

use super::{store_file, StoreScan};
use cubby_core::{compact_store, CompactionReport, OpContext, Store};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long to wait for another process to release the store.
const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Options of the compact command.
#[derive(Debug, Clone, Default)]
pub struct CompactOptions {
    /// Directory to write the compacted store into; the source directory if absent.
    pub destination: Option<PathBuf>,
    /// Overall time limit in milliseconds, zero for none.
    pub timeout_ms: u64,
    /// Maximum operation bytes per frame, zero for a single frame.
    pub max_txn_size: u64,
    /// Only report what would be reclaimed.
    pub dry_run: bool,
}

/// Runs the compact command.
pub fn run(path: &Path, options: &CompactOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store_path = store_file(path)?;

    let scan = StoreScan::read(&store_path)?;
    let stats = scan.stats();
    println!("Compaction Analysis");
    println!("===================");
    println!();
    println!("File size: {} bytes", stats.file_size);
    println!("Live data: {} bytes", stats.live_bytes);
    println!("Reclaimable: {} bytes", stats.reclaimable_bytes());
    println!("Buckets: {}", stats.bucket_count);
    println!("Keys: {}", stats.key_count);

    if options.dry_run {
        return Ok(());
    }

    println!();
    println!("Performing compaction...");
    let report = compact(path, options)?;
    println!("✓ Compaction complete");
    println!();
    println!("Destination: {}", report.destination.display());
    println!(
        "Size: {} -> {} bytes ({} reclaimed)",
        report.source_size,
        report.compacted_size,
        report.reclaimed_bytes()
    );
    println!("Records: {} in {} buckets", report.records, report.buckets);
    println!("Elapsed: {:?}", report.elapsed);

    Ok(())
}

/// Compacts the store in `dir` as `options` describe.
///
/// Takes the store lock, so it fails while a manager has the store open.
pub fn compact(
    dir: &Path,
    options: &CompactOptions,
) -> Result<CompactionReport, Box<dyn std::error::Error>> {
    let store = Store::open(&store_file(dir)?, LOCK_TIMEOUT, true)?;
    let destination = options.destination.as_deref().unwrap_or(dir);

    let outcome = compact_store(
        &store,
        &OpContext::background(),
        destination,
        Duration::from_millis(options.timeout_ms),
        options.max_txn_size,
    );
    let closed = store.close();

    let (compacted, report) = outcome?;
    compacted.close()?;
    closed?;
    Ok(report)
}
