//! Inspect command implementation.

use super::{store_file, StoreScan};
use cubby_core::Namespace;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Output format of the inspect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown output format '{other}' (expected text or json)")),
        }
    }
}

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Bytes the live contents would take after compaction.
    pub live_bytes: u64,
    /// Bytes a compaction would reclaim.
    pub reclaimable_bytes: u64,
    /// Frames in the file, header included.
    pub frames: usize,
    /// Highest committed transaction ID.
    pub last_txid: Option<u64>,
    /// Number of buckets.
    pub bucket_count: usize,
    /// Number of live keys.
    pub key_count: usize,
    /// Offset of an incomplete final frame, if any.
    pub torn_tail: Option<u64>,
    /// Per-bucket details, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<BucketInfo>>,
}

/// Per-bucket details.
#[derive(Debug, Serialize)]
pub struct BucketInfo {
    /// Raw bucket identifier.
    pub id: String,
    /// Decoded namespace, absent if the identifier is not a namespace.
    pub namespace: Option<NamespaceInfo>,
    /// Live keys.
    pub keys: usize,
    /// Sum of key and value lengths.
    pub bytes: u64,
}

/// A decoded namespace.
#[derive(Debug, Serialize)]
pub struct NamespaceInfo {
    /// Component kind.
    pub kind: String,
    /// Component name.
    pub name: String,
    /// Discriminator.
    pub discriminator: String,
}

impl fmt::Display for BucketInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match &self.namespace {
            Some(ns) => Namespace::new(&*ns.kind, &*ns.name, &*ns.discriminator).to_string(),
            None => format!("<raw {}>", self.id),
        };
        write!(f, "{label}: {} keys, {} bytes", self.keys, self.bytes)
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_buckets: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_buckets)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }

    Ok(())
}

/// Reads the store in `dir` and summarizes it.
pub fn inspect(dir: &Path, show_buckets: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let path = store_file(dir)?;
    let scan = StoreScan::read(&path)?;
    let stats = scan.stats();

    let buckets = show_buckets.then(|| {
        scan.index
            .buckets()
            .map(|(id, keys)| BucketInfo {
                id: id.to_string(),
                namespace: Namespace::decode(id).ok().map(|ns| NamespaceInfo {
                    kind: ns.kind().to_string(),
                    name: ns.name().to_string(),
                    discriminator: ns.discriminator().to_string(),
                }),
                keys: keys.len(),
                bytes: keys
                    .iter()
                    .map(|(key, loc)| key.len() as u64 + u64::from(loc.len))
                    .sum(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: stats.file_size,
        live_bytes: stats.live_bytes,
        reclaimable_bytes: stats.reclaimable_bytes(),
        frames: scan.frames,
        last_txid: scan.last_txid.map(|id| id.as_u64()),
        bucket_count: stats.bucket_count,
        key_count: stats.key_count,
        torn_tail: scan.torn_tail,
        buckets,
    })
}

fn print_text(result: &InspectResult) {
    println!("Cubby Store Inspection");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!("File size: {} bytes", result.file_size);
    println!("Live data: {} bytes", result.live_bytes);
    println!("Reclaimable: {} bytes", result.reclaimable_bytes);
    println!("Frames: {}", result.frames);
    match result.last_txid {
        Some(txid) => println!("Last transaction: {txid}"),
        None => println!("Last transaction: none"),
    }
    println!("Buckets: {}", result.bucket_count);
    println!("Keys: {}", result.key_count);
    if let Some(offset) = result.torn_tail {
        println!("Torn tail at offset {offset} (discarded on next open)");
    }

    if let Some(buckets) = &result.buckets {
        println!();
        println!("Buckets:");
        for bucket in buckets {
            println!("  {bucket}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::populate;
    use tempfile::TempDir;

    #[test]
    fn format_parsing() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn inspect_decodes_namespaces() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.bucket_count, 2);
        assert_eq!(result.key_count, 1);

        let buckets = result.buckets.as_ref().unwrap();
        let receiver = buckets.iter().find(|b| b.keys == 1).unwrap();
        let ns = receiver.namespace.as_ref().unwrap();
        assert_eq!((ns.kind.as_str(), ns.name.as_str()), ("receiver", "filelog"));
        assert_eq!(receiver.bytes, 6 + 16);
        assert_eq!(receiver.to_string(), "receiver/filelog: 1 keys, 22 bytes");
    }

    #[test]
    fn json_omits_buckets_unless_requested() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        let json = serde_json::to_value(inspect(dir.path(), false).unwrap()).unwrap();
        assert_eq!(json["key_count"], 1);
        assert!(json.get("buckets").is_none());
    }
}
