//! Test fixtures and manager helpers.
//!
//! Provides storage managers over temporary directories so tests never
//! share on-disk state.

use cubby_core::{Client, Config, OpContext, StorageManager};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A started storage manager with automatic cleanup.
pub struct TestManager {
    /// The manager instance.
    pub manager: StorageManager,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: TempDir,
}

impl TestManager {
    /// Starts a manager with default settings in a fresh directory.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Starts a manager whose config is adjusted by `configure`.
    ///
    /// `configure` receives a default config already pointing at the
    /// temporary directory.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(Config::new(temp_dir.path()));
        let manager = StorageManager::new(config).expect("Failed to create manager");
        manager
            .start(&OpContext::background())
            .expect("Failed to start manager");
        Self { manager, temp_dir }
    }

    /// The store directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The store file.
    pub fn store_path(&self) -> PathBuf {
        self.temp_dir.path().join(cubby_core::STORE_FILE)
    }

    /// Returns a client for the given namespace.
    pub fn client(&self, kind: &str, name: &str, discriminator: &str) -> Client {
        self.manager
            .get_client(&OpContext::background(), kind, name, discriminator)
            .expect("Failed to get client")
    }

    /// Shuts the manager down and starts a new one on the same directory.
    pub fn restart(self) -> Self {
        let Self { manager, temp_dir } = self;
        let config = manager.config().clone();
        manager.shutdown().expect("Failed to shut down manager");
        drop(manager);

        let manager = StorageManager::new(config).expect("Failed to create manager");
        manager
            .start(&OpContext::background())
            .expect("Failed to restart manager");
        Self { manager, temp_dir }
    }

    /// Names of all entries in the store directory, sorted.
    pub fn directory_listing(&self) -> Vec<String> {
        list_directory(self.path())
    }
}

impl Default for TestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestManager {
    type Target = StorageManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Runs a test with a started manager over a temporary directory.
///
/// # Example
///
/// ```rust,ignore
/// use cubby_testkit::with_temp_manager;
///
/// #[test]
/// fn my_test() {
///     with_temp_manager(|fixture| {
///         let client = fixture.client("receiver", "filelog", "");
///     });
/// }
/// ```
pub fn with_temp_manager<F, R>(f: F) -> R
where
    F: FnOnce(&TestManager) -> R,
{
    let fixture = TestManager::new();
    f(&fixture)
}

/// Names of all entries in `dir`, sorted.
pub fn list_directory(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .map(|entry| {
            entry
                .expect("Failed to read directory entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

/// Size of the file at `path` in bytes.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path)
        .expect("Failed to stat file")
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubby_core::StorageClient;

    #[test]
    fn fixture_starts_manager() {
        let fixture = TestManager::new();
        let client = fixture.client("receiver", "filelog", "");
        client
            .set(&OpContext::background(), b"k", b"v")
            .unwrap();
        assert_eq!(fixture.directory_listing(), vec!["cubby.db"]);
    }

    #[test]
    fn restart_keeps_data() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        fixture
            .client("receiver", "filelog", "")
            .set(&ctx, b"offset", b"42")
            .unwrap();

        let fixture = fixture.restart();
        let client = fixture.client("receiver", "filelog", "");
        assert_eq!(client.get(&ctx, b"offset").unwrap(), Some(b"42".to_vec()));
    }
}
