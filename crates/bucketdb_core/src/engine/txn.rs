//! Raw byte-level transactions over the store.

use super::record::{LogRecord, Op};
use super::snapshot::{BucketData, Snapshot};
use super::store::{Store, Writer};
use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use bytes::Bytes;
use parking_lot::MutexGuard;
use std::sync::Arc;

/// A read-only view of one committed snapshot.
///
/// Holding a `ReadTxn` never blocks writers; later commits are not visible
/// through it.
#[derive(Debug, Clone)]
pub struct ReadTxn {
    snapshot: Arc<Snapshot>,
}

impl ReadTxn {
    pub(super) fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    /// Returns the stored value of `key` in `bucket`.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<Bytes> {
        self.snapshot.get(bucket, key).cloned()
    }

    /// Returns a handle to the named bucket.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<Arc<BucketData>> {
        self.snapshot.bucket(name).cloned()
    }

    /// Returns the sequence counter of `bucket`.
    #[must_use]
    pub fn sequence(&self, bucket: &str) -> u64 {
        self.snapshot.sequence(bucket)
    }

    /// Returns all bucket names in order.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        self.snapshot.buckets().map(|(name, _)| name.clone()).collect()
    }

    /// Returns the snapshot this transaction reads.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

/// The single in-flight write transaction of a store.
///
/// Changes are applied to a private copy of the snapshot, so reads through
/// the transaction see its own writes. Nothing reaches the file until
/// [`commit`](Self::commit); dropping the transaction discards everything.
pub struct WriteTxn<'a> {
    store: &'a Store,
    writer: MutexGuard<'a, Writer>,
    working: Snapshot,
    ops: Vec<Op>,
}

impl<'a> WriteTxn<'a> {
    pub(super) fn new(store: &'a Store, writer: MutexGuard<'a, Writer>, base: &Snapshot) -> Self {
        Self {
            store,
            writer,
            working: base.clone(),
            ops: Vec::new(),
        }
    }

    /// Returns the value of `key` in `bucket`, including uncommitted writes.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<Bytes> {
        self.working.get(bucket, key).cloned()
    }

    /// Returns whether `key` exists in `bucket`.
    #[must_use]
    pub fn contains(&self, bucket: &str, key: &[u8]) -> bool {
        self.working.get(bucket, key).is_some()
    }

    /// Returns a handle to the named bucket as currently staged.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<Arc<BucketData>> {
        self.working.bucket(name).cloned()
    }

    /// Returns the staged sequence counter of `bucket`.
    #[must_use]
    pub fn sequence(&self, bucket: &str) -> u64 {
        self.working.sequence(bucket)
    }

    /// Returns all bucket names in order.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        self.working.buckets().map(|(name, _)| name.clone()).collect()
    }

    /// Stages an insert or overwrite.
    pub fn put(&mut self, bucket: &str, key: Vec<u8>, value: Bytes) {
        self.stage(Op::Put {
            bucket: bucket.to_string(),
            key,
            value,
        });
    }

    /// Stages a delete. Returns whether the key existed.
    pub fn delete(&mut self, bucket: &str, key: &[u8]) -> bool {
        if !self.contains(bucket, key) {
            return false;
        }
        self.stage(Op::Delete {
            bucket: bucket.to_string(),
            key: key.to_vec(),
        });
        true
    }

    /// Stages a new sequence counter value for `bucket`.
    pub fn set_sequence(&mut self, bucket: &str, value: u64) {
        self.stage(Op::Sequence {
            bucket: bucket.to_string(),
            value,
        });
    }

    /// Stages creation of an empty bucket. Returns `false` if it exists.
    pub fn create_bucket(&mut self, name: &str) -> bool {
        if self.working.bucket(name).is_some() {
            return false;
        }
        self.stage(Op::CreateBucket {
            bucket: name.to_string(),
        });
        true
    }

    /// Stages removal of a bucket. Returns `false` if it did not exist.
    pub fn drop_bucket(&mut self, name: &str) -> bool {
        if self.working.bucket(name).is_none() {
            return false;
        }
        self.stage(Op::DropBucket {
            bucket: name.to_string(),
        });
        true
    }

    /// Number of staged operations.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    fn stage(&mut self, op: Op) {
        self.working.apply(&op);
        self.ops.push(op);
    }

    /// Makes the staged operations durable and visible.
    ///
    /// The whole transaction is appended in one write. The new snapshot is
    /// published only after the append (and fsync, if configured) succeed.
    /// A transaction with no operations commits without touching the file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the append fails; the file
    /// is truncated back and the published snapshot is unchanged.
    pub fn commit(self) -> CoreResult<SequenceNumber> {
        let WriteTxn {
            store,
            mut writer,
            mut working,
            ops,
        } = self;

        if ops.is_empty() {
            return Ok(working.committed());
        }

        let sequence = working.committed().next();
        let op_count = u32::try_from(ops.len())
            .map_err(|_| CoreError::invalid_argument("too many operations in one transaction"))?;

        let mut buf = Vec::new();
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

        store.append_durably(&mut writer, &buf)?;

        working.set_committed(sequence);
        store.publish(Arc::new(working));
        tracing::debug!(
            path = %store.path().display(),
            %sequence,
            ops = op_count,
            bytes = buf.len(),
            "committed transaction"
        );

        Ok(sequence)
    }

    /// Discards the staged operations.
    pub fn rollback(self) {
        if !self.ops.is_empty() {
            tracing::debug!(
                path = %self.store.path().display(),
                ops = self.ops.len(),
                "rolled back transaction"
            );
        }
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("path", &self.store.path())
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}
