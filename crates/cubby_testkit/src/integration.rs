//! Cross-crate integration test helpers.
//!
//! [`IntegrationHarness`] drives several clients of one manager and keeps a
//! model of what every namespace should contain, so a test can compact,
//! restart or crash the store and then check nothing was lost or leaked.

use crate::fixtures::TestManager;
use cubby_core::{Client, Compact, OpContext, StorageClient};
use std::collections::BTreeMap;
use std::time::Duration;

type Model = BTreeMap<(String, Vec<u8>), Vec<u8>>;

/// A manager, its clients, and the expected contents of each namespace.
pub struct IntegrationHarness {
    /// The manager fixture.
    pub fixture: TestManager,
    clients: BTreeMap<String, Client>,
    model: Model,
}

impl IntegrationHarness {
    /// Creates a harness over a fresh manager.
    pub fn new() -> Self {
        Self::with_fixture(TestManager::new())
    }

    /// Creates a harness over an existing fixture.
    pub fn with_fixture(fixture: TestManager) -> Self {
        Self {
            fixture,
            clients: BTreeMap::new(),
            model: Model::new(),
        }
    }

    /// Returns the client for component `name`, creating it on first use.
    pub fn client(&mut self, name: &str) -> &Client {
        let fixture = &self.fixture;
        self.clients
            .entry(name.to_string())
            .or_insert_with(|| fixture.client("receiver", name, ""))
    }

    /// Sets a key and records it in the model.
    pub fn set(&mut self, name: &str, key: &[u8], value: &[u8]) {
        self.client(name)
            .set(&OpContext::background(), key, value)
            .expect("Failed to set key");
        self.model
            .insert((name.to_string(), key.to_vec()), value.to_vec());
    }

    /// Deletes a key and removes it from the model.
    pub fn delete(&mut self, name: &str, key: &[u8]) {
        self.client(name)
            .delete(&OpContext::background(), key)
            .expect("Failed to delete key");
        self.model.remove(&(name.to_string(), key.to_vec()));
    }

    /// Compacts in place through the first client and rebinds every client
    /// to the compacted store.
    pub fn compact(&mut self, max_txn_size: u64) {
        let dir = self.fixture.path().to_path_buf();
        let first = self
            .clients
            .keys()
            .next()
            .cloned()
            .expect("compact needs at least one client");
        let compacted = self.clients[&first]
            .compact(&OpContext::background(), &dir, Duration::ZERO, max_txn_size)
            .expect("Failed to compact");
        self.clients.insert(first, compacted);
        self.rebind();
    }

    /// Shuts the manager down, starts it again and rebinds every client.
    pub fn restart(self) -> Self {
        let Self {
            fixture,
            clients,
            model,
        } = self;
        let names: Vec<String> = clients.into_keys().collect();
        let mut harness = Self {
            fixture: fixture.restart(),
            clients: BTreeMap::new(),
            model,
        };
        for name in names {
            harness.client(&name);
        }
        harness
    }

    fn rebind(&mut self) {
        let names: Vec<String> = self.clients.keys().cloned().collect();
        for name in names {
            let fresh = self.fixture.client("receiver", &name, "");
            self.clients.insert(name, fresh);
        }
    }

    /// Checks every client against the model, including keys set in other
    /// namespaces that must not be visible.
    pub fn verify_all(&mut self) {
        let ctx = OpContext::background();
        let keys: Vec<Vec<u8>> = self.model.keys().map(|(_, k)| k.clone()).collect();
        for (name, client) in &self.clients {
            for key in &keys {
                let expected = self.model.get(&(name.clone(), key.clone()));
                let actual = client.get(&ctx, key).expect("Failed to get key");
                assert_eq!(
                    actual.as_ref(),
                    expected,
                    "namespace {name} key {:?}",
                    String::from_utf8_lossy(key)
                );
            }
        }
    }

    /// Number of live keys the model expects.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{file_size, list_directory};
    use crate::generators::operations_strategy;
    use cubby_core::{
        Config, CoreError, Namespace, OpKind, Operation, StorageManager, Store, STORE_FILE,
    };
    use cubby_storage::InMemoryBackend;
    use proptest::prelude::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn bloat(harness: &mut IntegrationHarness) {
        for round in 0..20 {
            for i in 0..20 {
                let value = format!("{round}-{i}-{}", "x".repeat(64));
                harness.set("alpha", format!("k{i}").as_bytes(), value.as_bytes());
            }
        }
        for i in 0..10 {
            harness.delete("alpha", format!("k{i}").as_bytes());
        }
        harness.set("beta", b"k0", b"beta-value");
    }

    #[test]
    fn isolation_with_identical_keys() {
        let mut harness = IntegrationHarness::new();
        harness.set("alpha", b"offset", b"1");
        harness.set("beta", b"offset", b"2");
        harness.client("gamma");
        harness.verify_all();

        let fixture = &harness.fixture;
        let ctx = OpContext::background();
        let bare = fixture.client("receiver", "alpha", "");
        let tagged = fixture.client("receiver", "alpha", "0");
        assert_eq!(bare.get(&ctx, b"offset").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tagged.get(&ctx, b"offset").unwrap(), None);
    }

    #[test]
    fn soft_miss_and_idempotent_delete() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let client = fixture.client("receiver", "filelog", "");
        let size = file_size(&fixture.store_path());

        assert_eq!(client.get(&ctx, b"never-set").unwrap(), None);
        client.delete(&ctx, b"never-set").unwrap();
        client.delete(&ctx, b"never-set").unwrap();
        assert_eq!(file_size(&fixture.store_path()), size);
    }

    #[test]
    fn read_your_write_and_persistence() {
        let mut harness = IntegrationHarness::new();
        harness.set("alpha", b"k", b"v1");
        harness.set("alpha", b"k", b"v2");
        harness.set("beta", b"k", b"other");
        harness.verify_all();

        let mut harness = harness.restart();
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 2);
    }

    #[test]
    fn compaction_shrinks_then_holds_steady() {
        let mut harness = IntegrationHarness::new();
        bloat(&mut harness);
        let before = file_size(&harness.fixture.store_path());

        harness.compact(0);
        let after = file_size(&harness.fixture.store_path());
        assert!(after < before, "{after} >= {before}");
        harness.verify_all();

        harness.compact(0);
        assert_eq!(file_size(&harness.fixture.store_path()), after);
        harness.compact(1024);
        harness.verify_all();
        assert_eq!(harness.fixture.directory_listing(), vec![STORE_FILE]);
    }

    #[test]
    fn compaction_survives_restart() {
        let mut harness = IntegrationHarness::new();
        bloat(&mut harness);
        harness.compact(512);
        harness.set("alpha", b"after", b"compaction");

        let mut harness = harness.restart();
        harness.verify_all();
    }

    #[test]
    fn stale_client_fails_after_compaction() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let old = fixture.client("receiver", "filelog", "");
        old.set(&ctx, b"k", b"v").unwrap();

        let new = old
            .compact(&ctx, fixture.path(), Duration::from_secs(5), 0)
            .unwrap();
        assert!(matches!(old.get(&ctx, b"k"), Err(CoreError::StoreClosed)));
        assert!(matches!(old.set(&ctx, b"k", b"x"), Err(CoreError::StoreClosed)));
        assert_eq!(new.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));

        let from_manager = fixture.client("receiver", "filelog", "");
        assert!(Arc::ptr_eq(from_manager.store(), new.store()));
    }

    #[test]
    fn cross_directory_compaction_stays_in_managed_directory() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let client = fixture.client("receiver", "filelog", "");
        for i in 0..50 {
            client.set(&ctx, b"k", format!("v{i}").as_bytes()).unwrap();
        }
        let source_size = file_size(&fixture.store_path());
        let dest = TempDir::new().unwrap();

        let moved = client
            .compact(&ctx, dest.path(), Duration::from_secs(5), 0)
            .unwrap();
        assert_eq!(moved.get(&ctx, b"k").unwrap(), Some(b"v49".to_vec()));
        assert!(file_size(&fixture.store_path()) < source_size);
        assert_eq!(fixture.directory_listing(), vec![STORE_FILE]);
        assert!(list_directory(dest.path()).is_empty());

        moved.set(&ctx, b"k", b"after").unwrap();
        fixture.compact(&ctx).unwrap();

        let fixture = fixture.restart();
        let client = fixture.client("receiver", "filelog", "");
        assert_eq!(client.get(&ctx, b"k").unwrap(), Some(b"after".to_vec()));
    }

    #[test]
    fn cross_directory_staging_leaves_foreign_store_alone() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let client = fixture.client("receiver", "filelog", "");
        client.set(&ctx, b"k", b"v").unwrap();

        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join(STORE_FILE), b"someone else's store").unwrap();

        let moved = client
            .compact(&ctx, dest.path(), Duration::from_secs(5), 0)
            .unwrap();
        assert_eq!(moved.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(
            fs::read(dest.path().join(STORE_FILE)).unwrap(),
            b"someone else's store"
        );
        assert_eq!(list_directory(dest.path()), vec![STORE_FILE]);
        assert_eq!(fixture.directory_listing(), vec![STORE_FILE]);
    }

    #[test]
    fn cross_directory_timeout_cleans_both_directories() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let client = fixture.client("receiver", "filelog", "");
        client.set(&ctx, b"k", b"v").unwrap();
        let dest = TempDir::new().unwrap();

        let writer = client.store().begin_write(&ctx).unwrap();
        let err = std::thread::scope(|s| {
            s.spawn(|| client.compact(&ctx, dest.path(), Duration::from_millis(50), 0))
                .join()
                .unwrap()
                .unwrap_err()
        });
        drop(writer);

        assert!(matches!(err, CoreError::CompactionTimeout { .. }));
        assert!(list_directory(dest.path()).is_empty());
        assert_eq!(fixture.directory_listing(), vec![STORE_FILE]);
        client.set(&ctx, b"k", b"v2").unwrap();
        assert_eq!(client.get(&ctx, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn unmanaged_client_refuses_existing_store() {
        let source = TempDir::new().unwrap();
        let ctx = OpContext::background();
        let store = Store::open(&source.path().join(STORE_FILE), Duration::from_secs(1), true)
            .unwrap();
        let client =
            Client::bind(&ctx, Arc::new(store), Namespace::new("receiver", "filelog", "")).unwrap();
        client.set(&ctx, b"k", b"v").unwrap();

        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join(STORE_FILE), b"someone else's store").unwrap();

        let err = client
            .compact(&ctx, dest.path(), Duration::from_secs(5), 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::DestinationExists { .. }));
        assert_eq!(
            fs::read(dest.path().join(STORE_FILE)).unwrap(),
            b"someone else's store"
        );
        assert_eq!(list_directory(dest.path()), vec![STORE_FILE]);
        assert_eq!(list_directory(source.path()), vec![STORE_FILE]);
        assert_eq!(client.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn unmanaged_client_compacts_into_destination() {
        let source = TempDir::new().unwrap();
        let ctx = OpContext::background();
        let store = Store::open(&source.path().join(STORE_FILE), Duration::from_secs(1), true)
            .unwrap();
        let client =
            Client::bind(&ctx, Arc::new(store), Namespace::new("receiver", "filelog", "")).unwrap();
        for i in 0..20 {
            client.set(&ctx, b"k", format!("v{i}").as_bytes()).unwrap();
        }
        let source_size = file_size(&source.path().join(STORE_FILE));

        let dest = TempDir::new().unwrap();
        let moved = client
            .compact(&ctx, dest.path(), Duration::from_secs(5), 0)
            .unwrap();
        assert_eq!(moved.get(&ctx, b"k").unwrap(), Some(b"v19".to_vec()));
        assert_eq!(file_size(&source.path().join(STORE_FILE)), source_size);
        assert_eq!(list_directory(dest.path()), vec![STORE_FILE]);
    }

    #[test]
    fn failed_compaction_leaves_store_usable() {
        let fixture = TestManager::new();
        let ctx = OpContext::background();
        let client = fixture.client("receiver", "filelog", "");
        client.set(&ctx, b"k", b"v").unwrap();

        let missing = fixture.path().join("does-not-exist");
        let err = client
            .compact(&ctx, &missing, Duration::from_secs(5), 0)
            .unwrap_err();
        assert!(err.is_config_error());

        client.set(&ctx, b"k2", b"v2").unwrap();
        assert_eq!(client.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(fixture.directory_listing(), vec![STORE_FILE]);
    }

    #[test]
    fn start_fails_once_directory_is_gone() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");
        fs::create_dir(&dir).unwrap();

        let manager = StorageManager::new(Config::new(&dir)).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let ctx = OpContext::background();
        let err = manager.start(&ctx).unwrap_err();
        assert!(err.is_config_error(), "{err}");
        assert!(manager.get_client(&ctx, "receiver", "filelog", "").is_err());
    }

    #[test]
    fn directory_removed_after_start() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");
        let manager = StorageManager::new(Config::new(&dir).create_directory(true)).unwrap();
        let ctx = OpContext::background();
        manager.start(&ctx).unwrap();
        let client = manager.get_client(&ctx, "receiver", "filelog", "").unwrap();

        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            manager.get_client(&ctx, "receiver", "other", ""),
            Err(CoreError::StoreUnavailable { .. })
        ));
        assert!(matches!(
            client.set(&ctx, b"k", b"v"),
            Err(CoreError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn cleanup_on_start_removes_stale_staging_files() {
        let fixture = TestManager::new();
        let path = fixture.path().to_path_buf();
        let config = fixture.manager.config().clone().cleanup_on_start(true);
        fixture.shutdown().unwrap();
        fs::write(path.join("tempdb-left-behind"), b"partial").unwrap();

        let manager = StorageManager::new(config).unwrap();
        manager.start(&OpContext::background()).unwrap();
        assert_eq!(list_directory(&path), vec![STORE_FILE]);
    }

    #[test]
    fn compaction_on_start() {
        let mut harness = IntegrationHarness::new();
        bloat(&mut harness);
        let before = file_size(&harness.fixture.store_path());
        let config = harness
            .fixture
            .manager
            .config()
            .clone()
            .compaction(cubby_core::CompactionConfig::default().on_start(true));
        harness.fixture.shutdown().unwrap();

        let manager = StorageManager::new(config).unwrap();
        manager.start(&OpContext::background()).unwrap();
        assert!(manager.stats().unwrap().file_size < before);

        let client = manager
            .get_client(&OpContext::background(), "receiver", "beta", "")
            .unwrap();
        assert_eq!(
            client.get(&OpContext::background(), b"k0").unwrap(),
            Some(b"beta-value".to_vec())
        );
    }

    #[test]
    fn manager_compact_reports() {
        let mut harness = IntegrationHarness::new();
        bloat(&mut harness);
        let report = harness.fixture.compact(&OpContext::background()).unwrap();
        assert!(report.reclaimed_bytes() > 0);
        assert_eq!(report.records, 11);
        assert_eq!(report.buckets, 2);
        assert_eq!(report.compacted_size, harness.fixture.stats().unwrap().file_size);
        harness.rebind();
        harness.verify_all();
    }

    #[test]
    fn failed_write_is_not_visible_and_store_recovers() {
        let backend = InMemoryBackend::new();
        let switch = backend.fail_switch();
        let store = Arc::new(Store::open_with_backend(Box::new(backend)).unwrap());
        let ctx = OpContext::background();
        let client = Client::bind(&ctx, Arc::clone(&store), Namespace::new("exporter", "otlp", "")).unwrap();
        client.set(&ctx, b"cursor", b"1").unwrap();

        switch.set(true);
        assert!(client.set(&ctx, b"cursor", b"2").is_err());
        let mut ops = vec![Operation::set("cursor", "3"), Operation::delete("cursor")];
        assert!(client.batch(&ctx, &mut ops).is_err());
        assert_eq!(client.get(&ctx, b"cursor").unwrap(), Some(b"1".to_vec()));

        switch.set(false);
        client.set(&ctx, b"cursor", b"4").unwrap();
        assert_eq!(client.get(&ctx, b"cursor").unwrap(), Some(b"4".to_vec()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn batches_match_a_map_model(batches in prop::collection::vec(operations_strategy(12), 1..6)) {
            let fixture = TestManager::with_config(|c| c.fsync(false));
            let ctx = OpContext::background();
            let client = fixture.client("processor", "batch", "");
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

            for mut ops in batches {
                let mut expected_reads = Vec::new();
                let mut staged = model.clone();
                for op in &ops {
                    match op.kind {
                        OpKind::Get => expected_reads.push(staged.get(&op.key).cloned()),
                        OpKind::Set => {
                            staged.insert(op.key.clone(), op.value.clone().unwrap_or_default());
                        }
                        OpKind::Delete => {
                            staged.remove(&op.key);
                        }
                    }
                }

                client.batch(&ctx, &mut ops).unwrap();
                model = staged;

                let reads: Vec<_> = ops
                    .iter()
                    .filter(|op| op.kind == OpKind::Get)
                    .map(|op| op.value.clone())
                    .collect();
                prop_assert_eq!(reads, expected_reads);
            }

            for key in ["a", "b", "c", "d", "e"] {
                prop_assert_eq!(
                    client.get(&ctx, key.as_bytes()).unwrap(),
                    model.get(key.as_bytes()).cloned()
                );
            }
        }
    }
}
