//! Immutable views of committed state.

use super::record::Op;
use crate::types::SequenceNumber;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Records and sequence counter of one bucket.
#[derive(Debug, Clone, Default)]
pub struct BucketData {
    entries: BTreeMap<Vec<u8>, Bytes>,
    sequence: u64,
}

impl BucketData {
    /// Returns the stored value for `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.entries.get(key)
    }

    /// Returns whether `key` exists.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the bucket holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sequence counter.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the first entry strictly after `after`, or the first entry
    /// at all when `after` is `None`.
    #[must_use]
    pub fn next_after(&self, after: Option<&[u8]>) -> Option<(&Vec<u8>, &Bytes)> {
        match after {
            Some(key) => self
                .entries
                .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next(),
            None => self.entries.iter().next(),
        }
    }

    /// Returns the first entry whose key is `>= start`.
    #[must_use]
    pub fn first_at_or_after(&self, start: &[u8]) -> Option<(&Vec<u8>, &Bytes)> {
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .next()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Bytes)> {
        self.entries.iter()
    }
}

/// The committed state of every bucket at one sequence number.
///
/// Snapshots are shared behind an `Arc` and never mutated once published. A
/// writer clones the snapshot (cloning only the bucket map of `Arc`s) and
/// copies a bucket the first time it changes it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    buckets: BTreeMap<String, Arc<BucketData>>,
    committed: SequenceNumber,
}

impl Snapshot {
    /// Returns the sequence number of the last applied commit.
    #[must_use]
    pub fn committed(&self) -> SequenceNumber {
        self.committed
    }

    pub(crate) fn set_committed(&mut self, sequence: SequenceNumber) {
        self.committed = sequence;
    }

    /// Returns the named bucket.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<&Arc<BucketData>> {
        self.buckets.get(name)
    }

    /// Returns the stored value of `key` in `bucket`.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<&Bytes> {
        self.buckets.get(bucket).and_then(|b| b.get(key))
    }

    /// Returns the sequence counter of `bucket`, zero if it does not exist.
    #[must_use]
    pub fn sequence(&self, bucket: &str) -> u64 {
        self.buckets.get(bucket).map_or(0, |b| b.sequence)
    }

    /// Iterates over buckets in name order.
    pub fn buckets(&self) -> impl Iterator<Item = (&String, &Arc<BucketData>)> {
        self.buckets.iter()
    }

    /// Applies one operation.
    pub fn apply(&mut self, op: &Op) {
        match op {
            Op::Put { bucket, key, value } => {
                let data = Arc::make_mut(self.buckets.entry(bucket.clone()).or_default());
                data.entries.insert(key.clone(), value.clone());
            }
            Op::Delete { bucket, key } => {
                if let Some(data) = self.buckets.get_mut(bucket) {
                    Arc::make_mut(data).entries.remove(key);
                }
            }
            Op::Sequence { bucket, value } => {
                let data = Arc::make_mut(self.buckets.entry(bucket.clone()).or_default());
                data.sequence = *value;
            }
            Op::CreateBucket { bucket } => {
                self.buckets.entry(bucket.clone()).or_default();
            }
            Op::DropBucket { bucket } => {
                self.buckets.remove(bucket);
            }
        }
    }

    /// Operations that rebuild this snapshot from nothing.
    pub(crate) fn to_ops(&self) -> Vec<Op> {
        let mut ops = Vec::new();
        for (name, data) in &self.buckets {
            ops.push(Op::CreateBucket {
                bucket: name.clone(),
            });
            if data.sequence > 0 {
                ops.push(Op::Sequence {
                    bucket: name.clone(),
                    value: data.sequence,
                });
            }
            ops.extend(data.entries.iter().map(|(key, value)| Op::Put {
                bucket: name.clone(),
                key: key.clone(),
                value: value.clone(),
            }));
        }
        ops
    }
}
