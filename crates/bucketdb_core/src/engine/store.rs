//! The single-file bucket store.

use super::lock::StoreLock;
use super::record::{file_header, LogRecord};
use super::replay::replay;
use super::snapshot::Snapshot;
use super::txn::{ReadTxn, WriteTxn};
use crate::error::{CoreError, CoreResult};
use crate::factory::BackendKind;
use bucketdb_storage::{write_file_atomic, FileBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How a store file is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create the file and its parent directories if missing.
    pub create_if_missing: bool,
    /// Fsync after every commit.
    pub sync_on_commit: bool,
    /// How long to retry a held lock.
    pub lock_timeout: Duration,
    /// Never write to the file: no header, no tail repair, no commits.
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            lock_timeout: Duration::ZERO,
            read_only: false,
        }
    }
}

/// Per-bucket figures reported by [`Store::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    /// Bucket name.
    pub name: String,
    /// Number of records.
    pub records: usize,
    /// Sequence counter.
    pub sequence: u64,
}

/// Summary of a store's committed state.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Store file path.
    pub path: PathBuf,
    /// Current file size in bytes.
    pub file_size: u64,
    /// Sequence number of the last commit.
    pub committed: u64,
    /// Every bucket, internal ones included.
    pub buckets: Vec<BucketStats>,
}

/// Result of checking a store file without opening it.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// Store file path.
    pub path: PathBuf,
    /// File size in bytes.
    pub file_size: u64,
    /// Bytes covered by committed transactions.
    pub valid_len: u64,
    /// Committed transactions.
    pub transactions: u64,
    /// Records inside committed transactions.
    pub records: u64,
    /// Bucket figures at the last commit.
    pub buckets: Vec<BucketStats>,
}

impl VerifyReport {
    /// Bytes past the last commit that an open would discard.
    #[must_use]
    pub fn torn_tail_bytes(&self) -> u64 {
        self.file_size.saturating_sub(self.valid_len)
    }
}

/// Sizes before and after [`Store::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactStats {
    /// File size before compaction.
    pub before: u64,
    /// File size after compaction.
    pub after: u64,
}

pub(crate) struct Writer {
    backend: Box<dyn StorageBackend>,
    lock: Option<StoreLock>,
    closed: bool,
}

/// An open store: one log file, its lock, and the published snapshot.
///
/// Writers are serialized by an internal mutex. Readers clone the current
/// snapshot `Arc` and never wait for writers.
pub struct Store {
    path: PathBuf,
    sync_on_commit: bool,
    read_only: bool,
    writer: Mutex<Writer>,
    current: RwLock<Arc<Snapshot>>,
}

fn unavailable(path: &Path, reason: impl Display) -> CoreError {
    CoreError::unavailable(BackendKind::File, path, reason)
}

impl Store {
    /// Opens the store at `path`, taking its exclusive lock and replaying the
    /// log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the file is missing (and
    /// may not be created), the lock is held elsewhere, or I/O fails, and
    /// [`CoreError::CorruptStore`] if replay finds corruption.
    pub fn open(path: &Path, options: &StoreOptions) -> CoreResult<Self> {
        if !path.exists() {
            if !options.create_if_missing || options.read_only {
                return Err(unavailable(path, "store file does not exist"));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| unavailable(path, e))?;
            }
        }

        let lock =
            StoreLock::acquire(path, options.lock_timeout).map_err(|e| unavailable(path, e))?;
        let backend = FileBackend::open(path).map_err(|e| unavailable(path, e))?;

        Self::from_parts(Box::new(backend), path.to_path_buf(), Some(lock), options)
    }

    /// Opens a store over an arbitrary backend, without file locking.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus locking.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        path: impl Into<PathBuf>,
        options: &StoreOptions,
    ) -> CoreResult<Self> {
        Self::from_parts(backend, path.into(), None, options)
    }

    fn from_parts(
        mut backend: Box<dyn StorageBackend>,
        path: PathBuf,
        lock: Option<StoreLock>,
        options: &StoreOptions,
    ) -> CoreResult<Self> {
        let data = backend.read_all().map_err(|e| unavailable(&path, e))?;
        let file_len = data.len() as u64;
        let replayed = replay(&data, &path)?;

        if options.read_only {
            if replayed.has_torn_tail(file_len) {
                tracing::debug!(
                    path = %path.display(),
                    ignored = file_len - replayed.valid_len,
                    "leaving incomplete tail of read-only store in place"
                );
            }
        } else if replayed.valid_len == 0 {
            if file_len > 0 {
                backend.truncate(0).map_err(|e| unavailable(&path, e))?;
            }
            backend
                .append(&file_header())
                .and_then(|_| backend.sync())
                .map_err(|e| unavailable(&path, e))?;
        } else if replayed.has_torn_tail(file_len) {
            tracing::warn!(
                path = %path.display(),
                discarded = file_len - replayed.valid_len,
                "discarding incomplete transaction at end of store"
            );
            backend
                .truncate(replayed.valid_len)
                .map_err(|e| unavailable(&path, e))?;
        }

        tracing::debug!(
            path = %path.display(),
            transactions = replayed.transactions,
            committed = %replayed.snapshot.committed(),
            "replayed store"
        );

        Ok(Self {
            path,
            sync_on_commit: options.sync_on_commit,
            read_only: options.read_only,
            writer: Mutex::new(Writer {
                backend,
                lock,
                closed: false,
            }),
            current: RwLock::new(Arc::new(replayed.snapshot)),
        })
    }

    /// Returns the store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a read transaction on the latest committed snapshot.
    #[must_use]
    pub fn read(&self) -> ReadTxn {
        ReadTxn::new(Arc::clone(&self.current.read()))
    }

    /// Starts the write transaction, waiting for any other writer to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] if the store has been closed
    /// and [`CoreError::InvalidArgument`] if it was opened read-only.
    pub fn write(&self) -> CoreResult<WriteTxn<'_>> {
        let writer = self.lock_writer_mut()?;
        let base = Arc::clone(&self.current.read());
        Ok(WriteTxn::new(self, writer, &base))
    }

    /// Whether the store was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn lock_writer_mut(&self) -> CoreResult<parking_lot::MutexGuard<'_, Writer>> {
        if self.read_only {
            return Err(CoreError::invalid_argument("store is opened read-only"));
        }
        self.lock_writer()
    }

    fn lock_writer(&self) -> CoreResult<parking_lot::MutexGuard<'_, Writer>> {
        let writer = self.writer.lock();
        if writer.closed {
            return Err(CoreError::ConnectionClosed {
                path: self.path.clone(),
            });
        }
        Ok(writer)
    }

    pub(super) fn append_durably(&self, writer: &mut Writer, data: &[u8]) -> CoreResult<()> {
        let backend = &mut writer.backend;
        let before = backend.size().map_err(|e| unavailable(&self.path, e))?;

        let result = backend.append(data).and_then(|_| {
            backend.flush()?;
            if self.sync_on_commit {
                backend.sync()?;
            }
            Ok(())
        });

        if let Err(e) = result {
            if let Err(undo) = backend.truncate(before) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %undo,
                    "failed to roll back partial commit"
                );
            }
            return Err(unavailable(&self.path, e));
        }
        Ok(())
    }

    pub(super) fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.current.write() = snapshot;
    }

    /// Flushes, syncs and releases the lock. Later writes fail with
    /// [`CoreError::ConnectionClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the final sync or unlock
    /// fails. The store is closed either way.
    pub fn close(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        if writer.closed {
            return Ok(());
        }
        writer.closed = true;

        let synced = writer
            .backend
            .flush()
            .and_then(|()| writer.backend.sync())
            .map_err(|e| unavailable(&self.path, e));
        let released = match writer.lock.take() {
            Some(lock) => lock.release().map_err(|e| unavailable(&self.path, e)),
            None => Ok(()),
        };

        synced.and(released)
    }

    /// Copies the committed log to `dest`.
    ///
    /// Holds the writer lock so no commit is half-written while copying.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `dest` is the store itself
    /// and [`CoreError::StoreUnavailable`] on I/O failure.
    pub fn backup_to(&self, dest: &Path) -> CoreResult<u64> {
        if dest == self.path {
            return Err(CoreError::invalid_argument(
                "backup destination is the store file itself",
            ));
        }

        let mut writer = self.lock_writer()?;
        writer
            .backend
            .flush()
            .map_err(|e| unavailable(&self.path, e))?;
        let data = writer
            .backend
            .read_all()
            .map_err(|e| unavailable(&self.path, e))?;
        drop(writer);

        write_file_atomic(dest, &data).map_err(|e| unavailable(dest, e))?;
        Ok(data.len() as u64)
    }

    /// Replaces the store contents with the store file at `source`.
    ///
    /// The source is fully replayed first; nothing changes if it is corrupt.
    /// A torn tail in the source is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptStore`] if the source is not a valid store
    /// and [`CoreError::StoreUnavailable`] if it cannot be read or the swap
    /// fails.
    pub fn restore_from(&self, source: &Path) -> CoreResult<StoreStats> {
        let data = fs::read(source).map_err(|e| unavailable(source, e))?;
        let replayed = replay(&data, source)?;
        if replayed.valid_len == 0 {
            return Err(CoreError::corrupt_store(source, 0, "file holds no store"));
        }
        let valid = &data[..replayed.valid_len as usize];

        let mut writer = self.lock_writer_mut()?;
        writer
            .backend
            .replace(valid)
            .map_err(|e| unavailable(&self.path, e))?;
        self.publish(Arc::new(replayed.snapshot));
        drop(writer);

        self.stats()
    }

    /// Rewrites the file as a single transaction holding the live state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the rewrite fails; the old
    /// file is kept in that case.
    pub fn compact(&self) -> CoreResult<CompactStats> {
        let mut writer = self.lock_writer_mut()?;
        let before = writer
            .backend
            .size()
            .map_err(|e| unavailable(&self.path, e))?;
        let snapshot = Arc::clone(&self.current.read());

        let mut buf = file_header().to_vec();
        let ops = snapshot.to_ops();
        if !ops.is_empty() {
            let sequence = snapshot.committed();
            let op_count = u32::try_from(ops.len())
                .map_err(|_| CoreError::invalid_argument("store too large to compact"))?;
            let encode = |record: LogRecord, buf: &mut Vec<u8>| {
                record
                    .encode_into(buf)
                    .map_err(|e| CoreError::invalid_argument(e.to_string()))
            };
            encode(LogRecord::Begin { sequence }, &mut buf)?;
            for op in ops {
                encode(LogRecord::Op(op), &mut buf)?;
            }
            encode(LogRecord::Commit { sequence, op_count }, &mut buf)?;
        }

        writer
            .backend
            .replace(&buf)
            .map_err(|e| unavailable(&self.path, e))?;

        Ok(CompactStats {
            before,
            after: buf.len() as u64,
        })
    }

    /// Returns bucket and file figures.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the file size cannot be read.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let file_size = {
            let writer = self.writer.lock();
            writer
                .backend
                .size()
                .map_err(|e| unavailable(&self.path, e))?
        };
        let snapshot = Arc::clone(&self.current.read());

        Ok(StoreStats {
            path: self.path.clone(),
            file_size,
            committed: snapshot.committed().as_u64(),
            buckets: bucket_stats(&snapshot),
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

fn bucket_stats(snapshot: &Snapshot) -> Vec<BucketStats> {
    snapshot
        .buckets()
        .map(|(name, data)| BucketStats {
            name: name.clone(),
            records: data.len(),
            sequence: data.sequence(),
        })
        .collect()
}

/// Replays the store file at `path` read-only and reports what it holds.
///
/// Takes no lock and changes nothing, so it can inspect a store another
/// process has open.
///
/// # Errors
///
/// Returns [`CoreError::StoreUnavailable`] if the file cannot be read and
/// [`CoreError::CorruptStore`] if replay fails.
pub fn verify(path: &Path) -> CoreResult<VerifyReport> {
    let data = fs::read(path).map_err(|e| unavailable(path, e))?;
    let replayed = replay(&data, path)?;

    Ok(VerifyReport {
        path: path.to_path_buf(),
        file_size: data.len() as u64,
        valid_len: replayed.valid_len,
        transactions: replayed.transactions,
        records: replayed.records,
        buckets: bucket_stats(&replayed.snapshot),
    })
}
