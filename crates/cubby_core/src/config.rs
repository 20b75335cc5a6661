//! Storage configuration.

use crate::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a storage manager.
///
/// Values are normally filled in by the host's configuration loader; the
/// builder methods exist for embedding and tests.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the store file.
    pub directory: PathBuf,

    /// Whether `start` creates the directory when it is missing.
    pub create_directory: bool,

    /// Unix permission bits for a directory created by `start`.
    pub directory_permissions: u32,

    /// How long `start` waits for the store file lock (0 = forever).
    pub timeout: Duration,

    /// Whether every commit is fsynced before it is acknowledged.
    pub fsync: bool,

    /// Whether `start` removes staging files left by an interrupted compaction.
    pub cleanup_on_start: bool,

    /// Automatic compaction settings.
    pub compaction: CompactionConfig,
}

/// Settings for compactions the manager runs on its own.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Compact in place right after the store is opened.
    pub on_start: bool,

    /// Compact in place whenever the file has grown far beyond its live data.
    pub on_rebound: bool,

    /// Rebound compaction only runs while live data is below this size.
    pub rebound_needed_threshold_mib: u64,

    /// Rebound compaction only runs once the file is above this size.
    pub rebound_trigger_threshold_mib: u64,

    /// How often the rebound worker looks at the store.
    pub check_interval: Duration,

    /// Upper bound on the payload of one commit frame in the compacted file
    /// (0 = one frame for everything).
    pub max_transaction_size: u64,

    /// How long a compaction may hold the writer lock (0 = no limit).
    pub timeout: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            on_start: false,
            on_rebound: false,
            rebound_needed_threshold_mib: 10,
            rebound_trigger_threshold_mib: 100,
            check_interval: Duration::from_secs(5),
            max_transaction_size: 64 * 1024,
            timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Creates a configuration for `directory` with default values.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            create_directory: false,
            directory_permissions: 0o750,
            timeout: Duration::from_secs(1),
            fsync: true,
            cleanup_on_start: false,
            compaction: CompactionConfig::default(),
        }
    }

    /// Returns the configured directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Sets whether the directory is created when missing.
    #[must_use]
    pub const fn create_directory(mut self, value: bool) -> Self {
        self.create_directory = value;
        self
    }

    /// Sets the permission bits for a created directory.
    #[must_use]
    pub const fn directory_permissions(mut self, mode: u32) -> Self {
        self.directory_permissions = mode;
        self
    }

    /// Sets the lock/open timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether commits are fsynced.
    #[must_use]
    pub const fn fsync(mut self, value: bool) -> Self {
        self.fsync = value;
        self
    }

    /// Sets whether stale staging files are removed on start.
    #[must_use]
    pub const fn cleanup_on_start(mut self, value: bool) -> Self {
        self.cleanup_on_start = value;
        self
    }

    /// Replaces the compaction settings.
    #[must_use]
    pub fn compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    /// Checks the configuration for values that can never work.
    ///
    /// The directory itself is checked at start, not here.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(CoreError::config("directory must be set"));
        }
        if self.directory_permissions > 0o7777 {
            return Err(CoreError::config(format!(
                "directory_permissions {:o} is not a valid permission mode",
                self.directory_permissions
            )));
        }

        let compaction = &self.compaction;
        if compaction.on_rebound {
            if compaction.check_interval.is_zero() {
                return Err(CoreError::config(
                    "compaction check_interval must be positive when on_rebound is enabled",
                ));
            }
            if compaction.rebound_trigger_threshold_mib == 0 {
                return Err(CoreError::config(
                    "rebound_trigger_threshold_mib must be positive when on_rebound is enabled",
                ));
            }
            if compaction.rebound_needed_threshold_mib > compaction.rebound_trigger_threshold_mib
            {
                return Err(CoreError::config(
                    "rebound_needed_threshold_mib must not exceed rebound_trigger_threshold_mib",
                ));
            }
        }

        Ok(())
    }
}

impl CompactionConfig {
    /// Sets whether to compact on start.
    #[must_use]
    pub const fn on_start(mut self, value: bool) -> Self {
        self.on_start = value;
        self
    }

    /// Sets whether to compact on rebound.
    #[must_use]
    pub const fn on_rebound(mut self, value: bool) -> Self {
        self.on_rebound = value;
        self
    }

    /// Sets both rebound thresholds, in MiB.
    #[must_use]
    pub const fn rebound_thresholds(mut self, needed_mib: u64, trigger_mib: u64) -> Self {
        self.rebound_needed_threshold_mib = needed_mib;
        self.rebound_trigger_threshold_mib = trigger_mib;
        self
    }

    /// Sets the rebound check interval.
    #[must_use]
    pub const fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the commit frame size bound for compacted files.
    #[must_use]
    pub const fn max_transaction_size(mut self, bytes: u64) -> Self {
        self.max_transaction_size = bytes;
        self
    }

    /// Sets the compaction timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
