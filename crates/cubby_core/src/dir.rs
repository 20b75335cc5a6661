//! Store directory layout.
//!
//! ```text
//! <directory>/
//! ├─ cubby.db          # the store file (locked while open)
//! └─ tempdb-<uuid>     # compaction staging file, only while compacting
//! ```
//!
//! Staging files are renamed over `cubby.db` when a compaction succeeds and
//! deleted when it fails. A hard kill in between can leave one behind, which
//! [`StoreDir::remove_stale_temp_files`] cleans up.

use crate::error::{CoreError, CoreResult};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Name of the store file inside its directory.
pub const STORE_FILE: &str = "cubby.db";

/// Prefix of compaction staging files.
pub const TEMP_PREFIX: &str = "tempdb";

/// A validated store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    /// Validates `path` as a usable store directory.
    ///
    /// With `create` set, a missing directory is created with `permissions`
    /// (Unix mode bits, ignored elsewhere).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the directory is missing, is not a
    /// directory, or is read-only.
    pub fn open(path: &Path, create: bool, permissions: u32) -> CoreResult<Self> {
        if !path.exists() {
            if !create {
                return Err(CoreError::config(format!(
                    "directory does not exist: {}",
                    path.display()
                )));
            }
            create_dir(path, permissions).map_err(|e| {
                CoreError::config(format!(
                    "cannot create directory {}: {e}",
                    path.display()
                ))
            })?;
            tracing::info!(path = %path.display(), "created store directory");
        }

        let metadata = fs::metadata(path).map_err(|e| {
            CoreError::config(format!("cannot access {}: {e}", path.display()))
        })?;
        if !metadata.is_dir() {
            return Err(CoreError::config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(CoreError::config(format!(
                "directory is not writable: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The directory itself.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the store file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.path.join(STORE_FILE)
    }

    /// A fresh, unique staging file path.
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        self.path
            .join(format!("{TEMP_PREFIX}-{}", uuid::Uuid::new_v4()))
    }

    /// Deletes leftover staging files and returns how many were removed.
    ///
    /// Only call this while no compaction can be running against the
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed. Files that cannot
    /// be removed are logged and skipped.
    pub fn remove_stale_temp_files(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !is_staging_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed stale compaction file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot remove stale compaction file");
                }
            }
        }
        if removed > 0 {
            self.sync()?;
        }
        Ok(removed)
    }

    /// Fsyncs the directory so renames and removals are durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or synced.
    #[cfg(unix)]
    pub fn sync(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Fsyncs the directory so renames and removals are durable.
    ///
    /// NTFS journals metadata, so there is nothing to do here.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}

fn is_staging_name(name: &str) -> bool {
    name.strip_prefix(TEMP_PREFIX)
        .is_some_and(|rest| rest.starts_with('-'))
}

#[cfg(unix)]
fn create_dir(path: &Path, permissions: u32) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(permissions)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _permissions: u32) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_config_error() {
        let temp = tempdir().unwrap();
        let err = StoreDir::open(&temp.path().join("absent"), false, 0o750).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn creates_directory_when_asked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("store");
        let dir = StoreDir::open(&path, true, 0o750).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.store_path(), path.join("cubby.db"));
    }

    #[cfg(unix)]
    #[test]
    fn created_directory_uses_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        StoreDir::open(&path, true, 0o700).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn file_is_not_a_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("file");
        fs::write(&path, b"x").unwrap();
        assert!(StoreDir::open(&path, false, 0o750).unwrap_err().is_config_error());
    }

    #[test]
    fn staging_paths_are_unique() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), false, 0o750).unwrap();
        let a = dir.staging_path();
        let b = dir.staging_path();
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(is_staging_name(&name));
    }

    #[test]
    fn removes_only_staging_files() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), false, 0o750).unwrap();
        fs::write(dir.staging_path(), b"stale").unwrap();
        fs::write(dir.staging_path(), b"stale").unwrap();
        fs::write(dir.store_path(), b"keep").unwrap();
        fs::write(temp.path().join("tempdbx"), b"keep").unwrap();

        assert_eq!(dir.remove_stale_temp_files().unwrap(), 2);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 2);
        assert!(dir.store_path().exists());
    }
}
