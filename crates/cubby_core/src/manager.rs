//! Storage manager: owns the store of one directory and hands out clients.
//!
//! ```rust,ignore
//! use cubby_core::{Config, OpContext, StorageClient, StorageManager};
//!
//! let manager = StorageManager::new(Config::new("/var/lib/pipeline"))?;
//! let ctx = OpContext::background();
//! manager.start(&ctx)?;
//!
//! let client = manager.get_client(&ctx, "receiver", "filelog", "")?;
//! client.set(&ctx, b"offset", b"4096")?;
//!
//! manager.shutdown()?;
//! ```

use crate::client::Client;
use crate::compaction::{compact_store, CompactionReport};
use crate::config::{CompactionConfig, Config};
use crate::context::OpContext;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::namespace::Namespace;
use crate::stats::StoreStats;
use crate::store::Store;
use cubby_storage::StorageError;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The manager's current store, shared with the clients it handed out so a
/// compaction started from any client can install its replacement.
#[derive(Debug, Default)]
pub(crate) struct StoreSlot {
    current: RwLock<Option<Arc<Store>>>,
}

impl StoreSlot {
    fn get(&self) -> Option<Arc<Store>> {
        self.current.read().clone()
    }

    fn replace(&self, store: Option<Arc<Store>>) -> Option<Arc<Store>> {
        std::mem::replace(&mut *self.current.write(), store)
    }

    /// Installs `new` if the slot still holds `old`.
    pub(crate) fn adopt(&self, old: &Arc<Store>, new: Arc<Store>) -> bool {
        let mut current = self.current.write();
        match current.as_ref() {
            Some(existing) if Arc::ptr_eq(existing, old) => {
                *current = Some(new);
                true
            }
            _ => false,
        }
    }

    /// Installs the compacted replacement of `old`.
    ///
    /// If the slot no longer holds `old`, e.g. after a shutdown, the
    /// replacement is closed so it does not keep the store file locked.
    pub(crate) fn install(&self, old: &Arc<Store>, new: Store) -> CoreResult<Arc<Store>> {
        let new = Arc::new(new);
        if self.adopt(old, Arc::clone(&new)) {
            return Ok(new);
        }
        tracing::warn!(
            path = ?new.path(),
            "store was replaced or shut down during compaction, closing the compacted store"
        );
        new.close()?;
        Err(CoreError::StoreClosed)
    }
}

enum State {
    Idle,
    Running { worker: Option<ReboundWorker> },
}

/// Owns the single store of a configured directory.
///
/// The manager is constructed from a validated [`Config`], opens the store
/// on [`start`](Self::start) and closes it on [`shutdown`](Self::shutdown).
/// Clients obtained in between share the store and stay valid until their
/// namespace is closed, the store is shut down, or a compaction replaces
/// it.
pub struct StorageManager {
    config: Config,
    slot: Arc<StoreSlot>,
    state: Mutex<State>,
}

impl StorageManager {
    /// Creates a manager. Nothing on disk is touched until `start`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the configuration is invalid.
    pub fn new(config: Config) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slot: Arc::new(StoreSlot::default()),
            state: Mutex::new(State::Idle),
        })
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the store and starts automatic compaction if configured.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Config`] if the directory is missing or unwritable
    /// - [`CoreError::StoreLocked`] if another handle holds the store file
    /// - [`CoreError::InvalidOperation`] if already started
    pub fn start(&self, ctx: &OpContext) -> CoreResult<()> {
        ctx.check()?;
        let mut state = self.state.lock();
        if matches!(*state, State::Running { .. }) {
            return Err(CoreError::invalid_operation("storage manager already started"));
        }

        let config = &self.config;
        let dir = StoreDir::open(
            config.directory(),
            config.create_directory,
            config.directory_permissions,
        )?;

        if config.cleanup_on_start {
            let removed = dir.remove_stale_temp_files()?;
            if removed > 0 {
                tracing::info!(path = %dir.path().display(), removed, "cleaned up stale compaction files");
            }
        }

        let path = dir.store_path();
        let store = Store::open(&path, config.timeout, config.fsync)
            .map_err(|e| directory_error(e, dir.path()))?;
        self.slot.replace(Some(Arc::new(store)));

        if config.compaction.on_start {
            if let Err(e) = self.compact(ctx) {
                tracing::warn!(path = %path.display(), error = %e, "compaction on start failed");
            }
        }

        let worker = if config.compaction.on_rebound {
            let spawned = ReboundWorker::spawn(
                Arc::clone(&self.slot),
                config.directory().to_path_buf(),
                config.compaction.clone(),
            );
            match spawned {
                Ok(worker) => Some(worker),
                Err(e) => {
                    if let Some(store) = self.slot.replace(None) {
                        store.close()?;
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        *state = State::Running { worker };
        tracing::info!(
            path = %path.display(),
            fsync = config.fsync,
            rebound = config.compaction.on_rebound,
            "storage manager started"
        );
        Ok(())
    }

    fn current(&self) -> CoreResult<Arc<Store>> {
        self.slot.get().ok_or(CoreError::NotStarted)
    }

    /// Returns a client for the namespace `(kind, name, discriminator)`,
    /// creating its bucket on first use.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotStarted`] before `start` or after `shutdown`
    /// - [`CoreError::StoreUnavailable`] if the store file has vanished
    pub fn get_client(
        &self,
        ctx: &OpContext,
        kind: &str,
        name: &str,
        discriminator: &str,
    ) -> CoreResult<Client> {
        ctx.check()?;
        let store = self.current()?;
        store.check_available()?;
        Client::bind_with_slot(
            ctx,
            store,
            Namespace::new(kind, name, discriminator),
            Some(Arc::clone(&self.slot)),
        )
    }

    /// Compacts the current store in place using the configured settings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotStarted`] or the compaction error; on error the
    /// current store is left untouched.
    pub fn compact(&self, ctx: &OpContext) -> CoreResult<CompactionReport> {
        let store = self.current()?;
        compact_in_place(&self.slot, &store, ctx, self.config.directory(), &self.config.compaction)
    }

    /// Size and content counters of the current store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotStarted`] if no store is open.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.current()?.stats()
    }

    /// Stops automatic compaction and closes the store. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync of the store fails; the manager is
    /// stopped regardless.
    pub fn shutdown(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let State::Running { worker } = std::mem::replace(&mut *state, State::Idle) else {
            return Ok(());
        };
        if let Some(worker) = worker {
            worker.stop();
        }

        let result = match self.slot.replace(None) {
            Some(store) => store.close(),
            None => Ok(()),
        };
        tracing::info!(path = %self.config.directory().display(), "storage manager stopped");
        result
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "storage manager shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("directory", &self.config.directory())
            .field("started", &self.slot.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Maps a failure to reach the directory at open time to a config error.
fn directory_error(err: CoreError, dir: &Path) -> CoreError {
    match err {
        CoreError::Storage(StorageError::Io(e))
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            CoreError::config(format!("cannot open store in {}: {e}", dir.display()))
        }
        other => other,
    }
}

fn compact_in_place(
    slot: &StoreSlot,
    store: &Arc<Store>,
    ctx: &OpContext,
    directory: &Path,
    config: &CompactionConfig,
) -> CoreResult<CompactionReport> {
    let (compacted, report) = compact_store(
        store,
        ctx,
        directory,
        config.timeout,
        config.max_transaction_size,
    )?;
    slot.install(store, compacted)?;
    Ok(report)
}

/// Background thread running rebound compaction.
struct ReboundWorker {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl ReboundWorker {
    fn spawn(
        slot: Arc<StoreSlot>,
        directory: std::path::PathBuf,
        config: CompactionConfig,
    ) -> CoreResult<Self> {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("cubby-rebound".into())
            .spawn(move || {
                let (stopped, wake) = &*thread_signal;
                let mut guard = stopped.lock();
                while !*guard {
                    wake.wait_for(&mut guard, config.check_interval);
                    if *guard {
                        break;
                    }
                    MutexGuard::unlocked(&mut guard, || {
                        rebound_check(&slot, &directory, &config);
                    });
                }
            })?;
        Ok(Self { signal, handle })
    }

    fn stop(self) {
        let (stopped, wake) = &*self.signal;
        *stopped.lock() = true;
        wake.notify_all();
        if self.handle.join().is_err() {
            tracing::warn!("rebound compaction worker panicked");
        }
    }
}

fn rebound_check(slot: &StoreSlot, directory: &Path, config: &CompactionConfig) {
    let Some(store) = slot.get() else {
        return;
    };
    let stats = match store.stats() {
        Ok(stats) => stats,
        Err(e) => {
            tracing::debug!(error = %e, "rebound check skipped");
            return;
        }
    };
    if !stats.exceeds_rebound(
        config.rebound_needed_threshold_mib,
        config.rebound_trigger_threshold_mib,
    ) {
        return;
    }

    tracing::info!(
        file_size = stats.file_size,
        live_bytes = stats.live_bytes,
        "store outgrew its live data, compacting"
    );
    if let Err(e) = compact_in_place(slot, &store, &OpContext::background(), directory, config) {
        tracing::warn!(error = %e, "rebound compaction failed");
    }
}
