//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// How often a contended lock is retried while waiting for it.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A single-file storage backend.
///
/// # Durability
///
/// - `flush()` pushes data to the OS
/// - `sync()` calls `File::sync_all()` so data and size are on disk
///
/// # Locking
///
/// [`FileBackend::lock_exclusive`] takes an advisory exclusive lock on the
/// file itself. The lock lives as long as the backend and is released when
/// it is dropped, so one store file is never served by two handles.
///
/// # Example
///
/// ```no_run
/// use cubby_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
/// use std::time::Duration;
///
/// let mut backend = FileBackend::open(Path::new("cubby.db")).unwrap();
/// backend.lock_exclusive(Duration::from_secs(1)).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// The parent directory must already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Creates a brand new file, failing if anything already exists at `path`.
    ///
    /// Compaction writes its staging file through this so it can never
    /// clobber an unrelated file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the path is taken, or an
    /// I/O error if the file cannot be created.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists {
                        path: path.to_path_buf(),
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires an exclusive advisory lock on the file.
    ///
    /// A contended lock is retried until `timeout` elapses. A zero timeout
    /// waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the lock is still held elsewhere
    /// when the timeout expires.
    pub fn lock_exclusive(&self, timeout: Duration) -> StorageResult<()> {
        let file = self.file.read();

        if timeout.is_zero() {
            file.lock_exclusive()?;
            return Ok(());
        }

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(()),
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(StorageError::Locked {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - waited));
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
    }

    /// Releases the advisory lock early.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to release the lock.
    pub fn unlock(&self) -> StorageResult<()> {
        FileExt::unlock(&*self.file.read())?;
        Ok(())
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = file.write_all(data) {
            // Drop whatever part of the frame made it out so the next append
            // starts on a clean boundary.
            if let Err(truncate_err) = file.set_len(offset) {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    error = %truncate_err,
                    "failed to roll back partial append"
                );
            }
            return Err(e.into());
        }
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn check_present(&self) -> StorageResult<()> {
        match std::fs::metadata(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::Missing {
                path: self.path.clone(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cubby.db");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("cubby.db")).unwrap();

        assert_eq!(backend.append(b"offset").unwrap(), 0);
        assert_eq!(backend.append(b"-42").unwrap(), 6);
        assert_eq!(backend.size().unwrap(), 9);

        assert_eq!(backend.read_at(0, 9).unwrap(), b"offset-42");
        assert_eq!(backend.read_at(6, 3).unwrap(), b"-42");
        assert!(backend.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("cubby.db")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cubby.db");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.read_at(0, 7).unwrap(), b"durable");
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cubby.db");
        std::fs::write(&path, b"unrelated").unwrap();

        let result = FileBackend::create_new(&path);
        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), b"unrelated");
    }

    #[test]
    fn second_lock_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cubby.db");

        let first = FileBackend::open(&path).unwrap();
        first.lock_exclusive(Duration::from_millis(100)).unwrap();

        let second = FileBackend::open(&path).unwrap();
        let result = second.lock_exclusive(Duration::from_millis(60));
        assert!(matches!(result, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cubby.db");

        {
            let first = FileBackend::open(&path).unwrap();
            first.lock_exclusive(Duration::from_millis(100)).unwrap();
        }

        let second = FileBackend::open(&path).unwrap();
        second.lock_exclusive(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn truncate_cuts_tail() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("cubby.db")).unwrap();
        backend.append(b"keep-torn").unwrap();

        backend.truncate(4).unwrap();
        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.append(b"!").unwrap(), 4);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"keep!");
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn check_present_detects_removed_directory() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join("store");
        std::fs::create_dir(&store_dir).unwrap();

        let backend = FileBackend::open(&store_dir.join("cubby.db")).unwrap();
        backend.check_present().unwrap();

        std::fs::remove_dir_all(&store_dir).unwrap();
        assert!(matches!(
            backend.check_present(),
            Err(StorageError::Missing { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_append_keeps_size_when_rollback_fails() {
        // Writes to /dev/full fail with ENOSPC and it cannot be truncated.
        let Ok(mut backend) = FileBackend::open(Path::new("/dev/full")) else {
            return;
        };

        assert!(matches!(backend.append(b"frame"), Err(StorageError::Io(_))));
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.append(b"again").is_err());
    }
}
