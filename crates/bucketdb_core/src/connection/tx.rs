//! Typed transactions.

use super::objects::Objects;
use super::value::{self, validate_bucket, CIPHER_MARKER_KEY, META_BUCKET, SCHEMA_VERSION_KEY};
use crate::crypto::Cipher;
use crate::engine::{ReadTxn, WriteTxn};
use crate::error::{CoreError, CoreResult};
use crate::types::{Key, SequenceNumber};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A read-only transaction over one committed snapshot.
///
/// Obtained through [`Connection::view_tx`](crate::Connection::view_tx).
pub struct ReadTx {
    txn: ReadTxn,
    cipher: Arc<dyn Cipher>,
}

impl ReadTx {
    pub(crate) fn new(txn: ReadTxn, cipher: Arc<dyn Cipher>) -> Self {
        Self { txn, cipher }
    }

    /// Reads and decodes one object. `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the stored bytes do not
    /// decrypt or decode.
    pub fn get_object<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: impl Into<Key>,
    ) -> CoreResult<Option<T>> {
        validate_bucket(bucket)?;
        let key = key.into();
        self.txn
            .get(bucket, key.as_bytes())
            .map(|stored| value::open(self.cipher.as_ref(), bucket, key.as_bytes(), &stored))
            .transpose()
    }

    /// Reads the object stored under the numeric identifier `id`.
    ///
    /// # Errors
    ///
    /// See [`get_object`](Self::get_object).
    pub fn get_object_by_id<T: DeserializeOwned>(
        &self,
        bucket: &str,
        id: u64,
    ) -> CoreResult<Option<T>> {
        self.get_object(bucket, Key::from_id(id))
    }

    /// Iterates over every object of `bucket` in key order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_all<T: DeserializeOwned>(&self, bucket: &str) -> CoreResult<Objects<T>> {
        self.get_all_with_key_prefix(bucket, b"")
    }

    /// Iterates over the objects of `bucket` whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_all_with_key_prefix<T: DeserializeOwned>(
        &self,
        bucket: &str,
        prefix: impl AsRef<[u8]>,
    ) -> CoreResult<Objects<T>> {
        validate_bucket(bucket)?;
        Ok(Objects::new(
            bucket,
            self.txn.bucket(bucket),
            prefix.as_ref().to_vec(),
            Arc::clone(&self.cipher),
        ))
    }

    /// Returns the identifier the next `create_object` would allocate.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_next_identifier(&self, bucket: &str) -> CoreResult<u64> {
        validate_bucket(bucket)?;
        Ok(self.txn.sequence(bucket).saturating_add(1))
    }

    /// Number of records in `bucket`, zero if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn count(&self, bucket: &str) -> CoreResult<usize> {
        validate_bucket(bucket)?;
        Ok(self.txn.bucket(bucket).map_or(0, |b| b.len()))
    }

    /// Names of all user buckets.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        user_buckets(self.txn.bucket_names())
    }

    /// Sequence number of the snapshot being read.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.txn.snapshot().committed()
    }

    pub(crate) fn schema_version(&self) -> CoreResult<Option<u64>> {
        self.txn
            .get(META_BUCKET, SCHEMA_VERSION_KEY)
            .map(|stored| {
                value::open(self.cipher.as_ref(), META_BUCKET, SCHEMA_VERSION_KEY, &stored)
            })
            .transpose()
    }

    pub(crate) fn cipher_marker(&self) -> Option<String> {
        self.txn
            .get(META_BUCKET, CIPHER_MARKER_KEY)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }
}

impl std::fmt::Debug for ReadTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTx")
            .field("sequence", &self.sequence())
            .field("cipher", &self.cipher.name())
            .finish()
    }
}

/// A read-write transaction.
///
/// Obtained through [`Connection::update_tx`](crate::Connection::update_tx).
/// Reads see the transaction's own writes. Everything commits together when
/// the closure returns `Ok`; an `Err` or a panic discards it all.
pub struct WriteTx<'a> {
    txn: WriteTxn<'a>,
    cipher: Arc<dyn Cipher>,
}

impl<'a> WriteTx<'a> {
    pub(crate) fn new(txn: WriteTxn<'a>, cipher: Arc<dyn Cipher>) -> Self {
        Self { txn, cipher }
    }

    /// Reads and decodes one object, including uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the stored bytes do not
    /// decrypt or decode.
    pub fn get_object<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: impl Into<Key>,
    ) -> CoreResult<Option<T>> {
        validate_bucket(bucket)?;
        let key = key.into();
        self.read_object(bucket, key.as_bytes())
    }

    /// Reads the object stored under the numeric identifier `id`, including
    /// uncommitted writes.
    ///
    /// # Errors
    ///
    /// See [`get_object`](Self::get_object).
    pub fn get_object_by_id<T: DeserializeOwned>(
        &self,
        bucket: &str,
        id: u64,
    ) -> CoreResult<Option<T>> {
        validate_bucket(bucket)?;
        self.read_object(bucket, &id.to_be_bytes())
    }

    fn read_object<T: DeserializeOwned>(&self, bucket: &str, key: &[u8]) -> CoreResult<Option<T>> {
        self.txn
            .get(bucket, key)
            .map(|stored| value::open(self.cipher.as_ref(), bucket, key, &stored))
            .transpose()
    }

    /// Iterates over every object of `bucket` as currently staged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_all<T: DeserializeOwned>(&self, bucket: &str) -> CoreResult<Objects<T>> {
        self.get_all_with_key_prefix(bucket, b"")
    }

    /// Iterates over the staged objects of `bucket` whose key starts with
    /// `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_all_with_key_prefix<T: DeserializeOwned>(
        &self,
        bucket: &str,
        prefix: impl AsRef<[u8]>,
    ) -> CoreResult<Objects<T>> {
        validate_bucket(bucket)?;
        Ok(Objects::new(
            bucket,
            self.txn.bucket(bucket),
            prefix.as_ref().to_vec(),
            Arc::clone(&self.cipher),
        ))
    }

    /// Inserts or overwrites the object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the value cannot be serialized.
    pub fn update_object<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        key: impl Into<Key>,
        object: &T,
    ) -> CoreResult<()> {
        validate_bucket(bucket)?;
        let key = key.into();
        self.write_object(bucket, key.into_bytes(), object)
    }

    fn write_object<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        key: Vec<u8>,
        object: &T,
    ) -> CoreResult<()> {
        let stored = value::seal(self.cipher.as_ref(), bucket, &key, object)?;
        self.txn.put(bucket, key, stored);
        Ok(())
    }

    /// Reads the object at `key`, lets `update` modify it and writes it back.
    ///
    /// Returns `false`, writing nothing, if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the current value cannot be
    /// read and [`CoreError::Encoding`] if the new one cannot be written.
    pub fn update_object_func<T, F>(
        &mut self,
        bucket: &str,
        key: impl Into<Key>,
        update: F,
    ) -> CoreResult<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        validate_bucket(bucket)?;
        let key = key.into();
        let Some(mut object) = self.read_object::<T>(bucket, key.as_bytes())? else {
            return Ok(false);
        };
        update(&mut object);
        self.write_object(bucket, key.into_bytes(), &object)?;
        Ok(true)
    }

    /// Stores `object` under the bucket's next sequence identifier and
    /// returns that identifier.
    ///
    /// Identifiers start at 1 and never repeat, even after deletes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the value cannot be serialized.
    pub fn create_object<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        object: &T,
    ) -> CoreResult<u64> {
        self.create_object_with(bucket, |_| object)
    }

    /// Like [`create_object`](Self::create_object), but builds the object
    /// from its identifier first so it can embed it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the value cannot be serialized.
    pub fn create_object_with<T, F>(&mut self, bucket: &str, build: F) -> CoreResult<u64>
    where
        T: Serialize,
        F: FnOnce(u64) -> T,
    {
        validate_bucket(bucket)?;
        let id = self
            .txn
            .sequence(bucket)
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_argument(format!("bucket {bucket} is out of identifiers")))?;

        let object = build(id);
        self.write_object(bucket, Key::from_id(id).into_bytes(), &object)?;
        self.txn.set_sequence(bucket, id);
        Ok(id)
    }

    /// Inserts `object` under a caller-chosen numeric identifier.
    ///
    /// The bucket sequence is raised to at least `id`, so later
    /// `create_object` calls never collide with it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if `id` already exists.
    pub fn create_object_with_id<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        id: u64,
        object: &T,
    ) -> CoreResult<()> {
        validate_bucket(bucket)?;
        let key = Key::from_id(id);
        self.insert_new(bucket, key, object)?;
        if id > self.txn.sequence(bucket) {
            self.txn.set_sequence(bucket, id);
        }
        Ok(())
    }

    /// Inserts `object` under a string key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key already exists.
    pub fn create_object_with_string_id<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        id: &str,
        object: &T,
    ) -> CoreResult<()> {
        validate_bucket(bucket)?;
        if id.is_empty() {
            return Err(CoreError::invalid_argument("key must not be empty"));
        }
        self.insert_new(bucket, Key::from(id), object)
    }

    fn insert_new<T: Serialize + ?Sized>(
        &mut self,
        bucket: &str,
        key: Key,
        object: &T,
    ) -> CoreResult<()> {
        if self.txn.contains(bucket, key.as_bytes()) {
            return Err(CoreError::DuplicateKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        self.write_object(bucket, key.into_bytes(), object)
    }

    /// Deletes the object at `key`. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn delete_object(&mut self, bucket: &str, key: impl Into<Key>) -> CoreResult<()> {
        validate_bucket(bucket)?;
        self.txn.delete(bucket, key.into().as_bytes());
        Ok(())
    }

    /// Deletes every object for which `matches` returns `true` and returns
    /// how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if any object cannot be read; in
    /// that case nothing is deleted once the transaction rolls back.
    pub fn delete_all_objects<T, F>(&mut self, bucket: &str, mut matches: F) -> CoreResult<usize>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let doomed = self
            .get_all::<T>(bucket)?
            .filter_map(|item| match item {
                Ok((key, object)) => matches(&object).then_some(Ok(key)),
                Err(e) => Some(Err(e)),
            })
            .collect::<CoreResult<Vec<Key>>>()?;

        for key in &doomed {
            self.txn.delete(bucket, key.as_bytes());
        }
        Ok(doomed.len())
    }

    /// Returns the identifier the next `create_object` would allocate.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_next_identifier(&self, bucket: &str) -> CoreResult<u64> {
        validate_bucket(bucket)?;
        Ok(self.txn.sequence(bucket).saturating_add(1))
    }

    /// Number of staged records in `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn count(&self, bucket: &str) -> CoreResult<usize> {
        validate_bucket(bucket)?;
        Ok(self.txn.bucket(bucket).map_or(0, |b| b.len()))
    }

    /// Creates an empty bucket. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn create_bucket(&mut self, name: &str) -> CoreResult<bool> {
        validate_bucket(name)?;
        Ok(self.txn.create_bucket(name))
    }

    /// Removes a bucket with all its records and its sequence. Returns
    /// `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn delete_bucket(&mut self, name: &str) -> CoreResult<bool> {
        validate_bucket(name)?;
        Ok(self.txn.drop_bucket(name))
    }

    /// Names of all user buckets, as staged.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        user_buckets(self.txn.bucket_names())
    }

    pub(crate) fn schema_version(&self) -> CoreResult<Option<u64>> {
        self.read_object(META_BUCKET, SCHEMA_VERSION_KEY)
    }

    pub(crate) fn set_schema_version(&mut self, version: u64) -> CoreResult<()> {
        self.write_object(META_BUCKET, SCHEMA_VERSION_KEY.to_vec(), &version)
    }

    pub(crate) fn cipher_marker(&self) -> Option<String> {
        self.txn
            .get(META_BUCKET, CIPHER_MARKER_KEY)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }

    pub(crate) fn set_cipher_marker(&mut self, name: &'static str) {
        self.txn.put(
            META_BUCKET,
            CIPHER_MARKER_KEY.to_vec(),
            Bytes::from_static(name.as_bytes()),
        );
    }

    pub(crate) fn cipher(&self) -> &Arc<dyn Cipher> {
        &self.cipher
    }

    pub(crate) fn replace_cipher(&mut self, cipher: Arc<dyn Cipher>) -> Arc<dyn Cipher> {
        std::mem::replace(&mut self.cipher, cipher)
    }

    pub(crate) fn raw(&mut self) -> &mut WriteTxn<'a> {
        &mut self.txn
    }

    pub(crate) fn commit(self) -> CoreResult<SequenceNumber> {
        self.txn.commit()
    }

    pub(crate) fn rollback(self) {
        self.txn.rollback();
    }
}

impl std::fmt::Debug for WriteTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx")
            .field("txn", &self.txn)
            .field("cipher", &self.cipher.name())
            .finish()
    }
}

fn user_buckets(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !value::is_reserved(name))
        .collect()
}
