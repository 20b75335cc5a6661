//! Benchmark utilities.

use cubby_core::{Client, Config, OpContext, StorageClient, StorageManager};
use rand::Rng;
use tempfile::TempDir;

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct keys.
pub fn generate_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("key-{i:08}").into_bytes()).collect()
}

/// A started manager over a temporary directory.
pub struct BenchStore {
    /// The manager.
    pub manager: StorageManager,
    _dir: TempDir,
}

impl BenchStore {
    /// Starts a manager with fsync disabled unless `fsync` is set.
    pub fn new(fsync: bool) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let manager =
            StorageManager::new(Config::new(dir.path()).fsync(fsync)).expect("Failed to create manager");
        manager
            .start(&OpContext::background())
            .expect("Failed to start manager");
        Self { manager, _dir: dir }
    }

    /// A client for the benchmark namespace.
    pub fn client(&self) -> Client {
        self.manager
            .get_client(&OpContext::background(), "receiver", "bench", "")
            .expect("Failed to get client")
    }

    /// Writes `keys` with `value_size` random bytes each, `rounds` times over.
    pub fn fill(&self, keys: &[Vec<u8>], value_size: usize, rounds: usize) -> Client {
        let client = self.client();
        let ctx = OpContext::background();
        for _ in 0..rounds {
            for key in keys {
                client
                    .set(&ctx, key, &random_data(value_size))
                    .expect("Failed to write");
            }
        }
        client
    }
}
