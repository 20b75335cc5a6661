//! Verify command implementation.

use super::store_file;
use cubby_core::store::{Frame, FrameIterator, FORMAT_VERSION};
use cubby_core::TransactionId;
use cubby_storage::FileBackend;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of frames that decoded cleanly.
    pub frames_checked: usize,
    /// Number of commit frames among them.
    pub commits: usize,
    /// Offset of an incomplete final frame, if any.
    pub torn_tail: Option<u64>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let result = verify(path)?;
    println!("  Frames checked: {}", result.frames_checked);
    println!("  Commits: {}", result.commits);
    if let Some(offset) = result.torn_tail {
        println!("  ! Torn tail at offset {offset} (discarded on next open)");
    }
    for error in &result.errors {
        println!("  ✗ {error}");
    }
    println!();

    if result.is_ok() {
        println!("✓ Store file is consistent");
        Ok(())
    } else {
        println!("✗ Store file has {} problem(s)", result.errors.len());
        Err("verification failed".into())
    }
}

/// Checks every frame of the store in `dir`.
///
/// The file must open with a header frame of a known format, no other
/// header may follow, and transaction IDs must strictly increase. Decoding
/// stops at the first corrupt frame.
pub fn verify(dir: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let path = store_file(dir)?;
    let backend = FileBackend::open(&path)?;
    let mut result = VerifyResult::default();
    let mut last_txid: Option<TransactionId> = None;

    let mut frames = FrameIterator::new(&backend)?;
    for entry in frames.by_ref() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        };

        let first = result.frames_checked == 0;
        result.frames_checked += 1;
        match entry.frame {
            Frame::Header { format_version } => {
                if !first {
                    result
                        .errors
                        .push(format!("extra header frame at offset {}", entry.offset));
                } else if format_version.0 != FORMAT_VERSION.0 {
                    result.errors.push(format!(
                        "unsupported store format {}.{}",
                        format_version.0, format_version.1
                    ));
                }
            }
            Frame::Commit { txid, .. } => {
                if first {
                    result.errors.push("store file does not start with a header".into());
                }
                if let Some(last) = last_txid.filter(|last| txid <= *last) {
                    result.errors.push(format!(
                        "{txid} at offset {} does not follow {last}",
                        entry.offset
                    ));
                }
                last_txid = Some(txid);
                result.commits += 1;
            }
        }
    }
    result.torn_tail = frames.torn_tail();

    Ok(result)
}
