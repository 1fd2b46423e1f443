//! Exclusive ownership of a store file.
//!
//! The lock lives on a sibling file, `<store>.lock`, so the data file itself
//! can be atomically replaced (restore, compaction) without dropping it.

use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Returns the lock file path for a store path.
#[must_use]
pub fn lock_path_for(store: &Path) -> PathBuf {
    let mut name = store
        .file_name()
        .map_or_else(OsString::new, OsString::from);
    name.push(".lock");
    store.with_file_name(name)
}

/// An OS-level exclusive lock on a store.
///
/// Only one `StoreLock` can exist per store path at a time, across processes
/// and across handles within one process.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    file: File,
}

impl StoreLock {
    /// Acquires the lock for `store`, retrying until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::WouldBlock`] if another holder keeps the
    /// lock past the timeout, or any error from opening the lock file.
    pub fn acquire(store: &Path, timeout: Duration) -> io::Result<Self> {
        let path = lock_path_for(store);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { path, file }),
                Err(_) if Instant::now() < deadline => thread::sleep(RETRY_INTERVAL),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "store is locked by another handle",
                    ))
                }
            }
        }
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to unlock.
    pub fn release(self) -> io::Result<()> {
        self.file.unlock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_sits_next_to_store() {
        assert_eq!(
            lock_path_for(Path::new("/data/portainer.db")),
            PathBuf::from("/data/portainer.db.lock")
        );
    }

    #[test]
    fn lock_prevents_second_acquire() {
        let temp = tempdir().unwrap();
        let store = temp.path().join("app.db");

        let _held = StoreLock::acquire(&store, Duration::ZERO).unwrap();
        let err = StoreLock::acquire(&store, Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn release_allows_reacquire() {
        let temp = tempdir().unwrap();
        let store = temp.path().join("app.db");

        StoreLock::acquire(&store, Duration::ZERO)
            .unwrap()
            .release()
            .unwrap();
        let _again = StoreLock::acquire(&store, Duration::ZERO).unwrap();
    }

    #[test]
    fn drop_releases_lock() {
        let temp = tempdir().unwrap();
        let store = temp.path().join("app.db");

        {
            let _held = StoreLock::acquire(&store, Duration::ZERO).unwrap();
        }
        let _again = StoreLock::acquire(&store, Duration::ZERO).unwrap();
    }

    #[test]
    fn waits_for_release_within_timeout() {
        let temp = tempdir().unwrap();
        let store = temp.path().join("app.db");

        let held = StoreLock::acquire(&store, Duration::ZERO).unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let _lock = StoreLock::acquire(&store, Duration::from_secs(5)).unwrap();
        releaser.join().unwrap();
    }
}
