//! The connection: typed, bucket-oriented access to one store.
//!
//! A [`Connection`] composes the [`Store`](crate::engine::Store) with the
//! codec and the configured [`Cipher`]. Every stored value is
//! `cipher.seal(codec.encode(object))`, bound to its bucket and key.
//!
//! Single-object calls (`get_object`, `update_object`, ...) run in their own
//! implicit transaction. Use [`Connection::update_tx`] or
//! [`Connection::view_tx`] to group work.

mod export;
mod objects;
mod tx;
mod value;

pub use objects::Objects;
pub use tx::{ReadTx, WriteTx};

use export::{cbor_to_json, key_json};
use value::META_BUCKET;

use crate::config::Config;
use crate::crypto::{cipher_for, record_aad, Cipher, PassthroughCipher};
use crate::engine::{CompactStats, Store, StoreOptions, StoreStats};
use crate::error::{CoreError, CoreResult};
use crate::factory::BackendKind;
use crate::types::Key;
use bucketdb_storage::write_file_atomic;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A handle to one store, opened and closed explicitly.
///
/// Construction does no I/O. [`open`](Self::open) takes the store's
/// exclusive lock and replays its log; [`close`](Self::close) releases it.
/// Every data operation on a closed connection fails with
/// [`CoreError::ConnectionClosed`]. A closed connection can be opened again.
///
/// `Connection` is `Send + Sync`; share it behind an `Arc`. Readers never
/// wait for writers, writers run one at a time.
///
/// # Example
///
/// ```no_run
/// use bucketdb_core::{new_connection, CoreResult};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Endpoint {
///     name: String,
///     url: String,
/// }
///
/// fn main() -> CoreResult<()> {
///     let conn = new_connection("boltdb", "/data/portainer.db", Some(b"secret"))?;
///     conn.open()?;
///
///     let id = conn.create_object(
///         "endpoints",
///         &Endpoint { name: "local".into(), url: "unix:///var/run/docker.sock".into() },
///     )?;
///     let endpoint: Option<Endpoint> = conn.get_object("endpoints", id)?;
///     assert!(endpoint.is_some());
///
///     conn.close()
/// }
/// ```
pub struct Connection {
    config: Config,
    cipher: Arc<dyn Cipher>,
    store: RwLock<Option<Arc<Store>>>,
}

impl Connection {
    /// Creates an unopened connection from a full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if no cipher can be built from
    /// the configured key.
    pub fn with_config(config: Config) -> CoreResult<Self> {
        let cipher = cipher_for(config.key_bytes())
            .map_err(|e| CoreError::invalid_argument(format!("encryption key: {e}")))?;
        Ok(Self {
            config,
            cipher,
            store: RwLock::new(None),
        })
    }

    /// Opens the store, creating it if configured to.
    ///
    /// On first open the schema version and the cipher marker are written,
    /// unless the connection is read-only. Opening an open connection is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the store is locked by
    /// another handle or I/O fails, and [`CoreError::CorruptStore`] if the
    /// file does not replay.
    pub fn open(&self) -> CoreResult<()> {
        let mut slot = self.store.write();
        if slot.is_some() {
            return Ok(());
        }

        let options = StoreOptions {
            create_if_missing: self.config.create_if_missing,
            sync_on_commit: self.config.sync_on_commit,
            lock_timeout: self.config.lock_timeout,
            read_only: self.config.read_only,
        };
        let store = Store::open(self.config.path(), &options)?;

        if self.config.read_only {
            info!(path = %self.config.path().display(), "opened store read-only");
            *slot = Some(Arc::new(store));
            return Ok(());
        }

        if let Err(e) = self.bootstrap(&store) {
            if let Err(close_err) = store.close() {
                warn!(path = %self.config.path().display(), error = %close_err, "failed to release store after open error");
            }
            return Err(e);
        }

        info!(
            path = %self.config.path().display(),
            backend = %self.config.backend,
            encrypted = self.cipher.is_encrypting(),
            "opened store"
        );
        *slot = Some(Arc::new(store));
        Ok(())
    }

    /// Writes the metadata a store needs and checks the cipher marker.
    fn bootstrap(&self, store: &Store) -> CoreResult<()> {
        let mut tx = WriteTx::new(store.write()?, Arc::clone(&self.cipher));

        let marker = match tx.cipher_marker() {
            Some(marker) => marker,
            None => {
                // Buckets written before markers existed were never sealed.
                let name = if tx.bucket_names().is_empty() {
                    self.cipher.name()
                } else {
                    PassthroughCipher.name()
                };
                tx.set_cipher_marker(name);
                name.to_string()
            }
        };

        if marker != self.cipher.name() {
            warn!(
                path = %self.config.path().display(),
                store_cipher = %marker,
                configured_cipher = self.cipher.name(),
                "store cipher differs from the configured one"
            );
        }

        if !tx.raw().contains(META_BUCKET, value::SCHEMA_VERSION_KEY) {
            let version = self.config.default_schema_version;
            if marker == self.cipher.name() {
                tx.set_schema_version(version)?;
            } else if marker == PassthroughCipher.name() {
                let configured = tx.replace_cipher(Arc::new(PassthroughCipher));
                tx.set_schema_version(version)?;
                tx.replace_cipher(configured);
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Flushes and releases the store. Closing a closed connection is a
    /// no-op.
    ///
    /// Waits for an in-flight write transaction to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the final sync or unlock
    /// fails. The connection is closed either way.
    pub fn close(&self) -> CoreResult<()> {
        let Some(store) = self.store.write().take() else {
            return Ok(());
        };
        store.close()?;
        info!(path = %self.config.path().display(), "closed store");
        Ok(())
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.store.read().is_some()
    }

    /// Whether values are encrypted with a configured key.
    #[must_use]
    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_encrypting()
    }

    /// Store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.config.path()
    }

    /// Backend this connection was built for.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.config.backend
    }

    /// The configuration this connection was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> CoreResult<Arc<Store>> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| CoreError::ConnectionClosed {
                path: self.config.path.clone(),
            })
    }

    /// Runs `f` in a write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back if it
    /// returns `Err` or panics. Other writers wait until it finishes; readers
    /// do not.
    ///
    /// ```no_run
    /// # use bucketdb_core::{Config, Connection};
    /// # let conn = Connection::with_config(Config::new("app.db"))?;
    /// # conn.open()?;
    /// conn.update_tx(|tx| {
    ///     let id = tx.create_object("teams", &"ops")?;
    ///     tx.update_object("memberships", id, &vec!["alice", "bob"])?;
    ///     Ok(())
    /// })?;
    /// # Ok::<(), bucketdb_core::CoreError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or the commit error.
    pub fn update_tx<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut WriteTx<'_>) -> CoreResult<R>,
    {
        let store = self.store()?;
        let mut tx = WriteTx::new(store.write()?, Arc::clone(&self.cipher));
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Runs `f` against a consistent snapshot of committed state.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`.
    pub fn view_tx<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&ReadTx) -> CoreResult<R>,
    {
        let store = self.store()?;
        let tx = ReadTx::new(store.read(), Arc::clone(&self.cipher));
        f(&tx)
    }

    /// Reads one object. `Ok(None)` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the record does not decrypt
    /// or decode.
    pub fn get_object<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: impl Into<Key>,
    ) -> CoreResult<Option<T>> {
        self.view_tx(|tx| tx.get_object(bucket, key))
    }

    /// Reads the object stored under the numeric identifier `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the record does not decrypt
    /// or decode.
    pub fn get_object_by_id<T: DeserializeOwned>(
        &self,
        bucket: &str,
        id: u64,
    ) -> CoreResult<Option<T>> {
        self.view_tx(|tx| tx.get_object_by_id(bucket, id))
    }

    /// Inserts or overwrites one object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the object cannot be serialized.
    pub fn update_object<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: impl Into<Key>,
        object: &T,
    ) -> CoreResult<()> {
        self.update_tx(|tx| tx.update_object(bucket, key, object))
    }

    /// Read-modify-write of one object in a single transaction. Returns
    /// `false` if the key is absent.
    ///
    /// # Errors
    ///
    /// See [`WriteTx::update_object_func`].
    pub fn update_object_func<T, F>(
        &self,
        bucket: &str,
        key: impl Into<Key>,
        update: F,
    ) -> CoreResult<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        self.update_tx(|tx| tx.update_object_func(bucket, key, update))
    }

    /// Stores an object under the next sequence identifier and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the object cannot be serialized.
    pub fn create_object<T: Serialize + ?Sized>(&self, bucket: &str, object: &T) -> CoreResult<u64> {
        self.update_tx(|tx| tx.create_object(bucket, object))
    }

    /// Stores an object built from its freshly allocated identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Encoding`] if the object cannot be serialized.
    pub fn create_object_with<T, F>(&self, bucket: &str, build: F) -> CoreResult<u64>
    where
        T: Serialize,
        F: FnOnce(u64) -> T,
    {
        self.update_tx(|tx| tx.create_object_with(bucket, build))
    }

    /// Inserts an object under a caller-chosen identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the identifier is taken.
    pub fn create_object_with_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: u64,
        object: &T,
    ) -> CoreResult<()> {
        self.update_tx(|tx| tx.create_object_with_id(bucket, id, object))
    }

    /// Inserts an object under a string key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is taken.
    pub fn create_object_with_string_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: &str,
        object: &T,
    ) -> CoreResult<()> {
        self.update_tx(|tx| tx.create_object_with_string_id(bucket, id, object))
    }

    /// Deletes one object. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn delete_object(&self, bucket: &str, key: impl Into<Key>) -> CoreResult<()> {
        self.update_tx(|tx| tx.delete_object(bucket, key))
    }

    /// Deletes every object matching `matches` in one transaction and
    /// returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if any object cannot be read;
    /// nothing is deleted then.
    pub fn delete_all_objects<T, F>(&self, bucket: &str, matches: F) -> CoreResult<usize>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        self.update_tx(|tx| tx.delete_all_objects(bucket, matches))
    }

    /// Iterates lazily over a snapshot of `bucket` in key order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_all<T: DeserializeOwned>(&self, bucket: &str) -> CoreResult<Objects<T>> {
        self.view_tx(|tx| tx.get_all(bucket))
    }

    /// Iterates lazily over the objects of `bucket` whose key starts with
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
        self.view_tx(|tx| tx.get_all_with_key_prefix(bucket, prefix))
    }

    /// Returns the identifier the next `create_object` would allocate,
    /// without allocating it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn get_next_identifier(&self, bucket: &str) -> CoreResult<u64> {
        self.view_tx(|tx| tx.get_next_identifier(bucket))
    }

    /// Number of records in `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn count(&self, bucket: &str) -> CoreResult<usize> {
        self.view_tx(|tx| tx.count(bucket))
    }

    /// Creates an empty bucket. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn create_bucket(&self, name: &str) -> CoreResult<bool> {
        self.update_tx(|tx| tx.create_bucket(name))
    }

    /// Removes a bucket and everything in it. Returns `false` if it did not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an invalid bucket name.
    pub fn delete_bucket(&self, name: &str) -> CoreResult<bool> {
        self.update_tx(|tx| tx.delete_bucket(name))
    }

    /// Names of all user buckets in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn bucket_names(&self) -> CoreResult<Vec<String>> {
        self.view_tx(|tx| Ok(tx.bucket_names()))
    }

    /// Copies the store to `path` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the copy fails.
    pub fn backup_to(&self, path: impl AsRef<Path>) -> CoreResult<u64> {
        let path = path.as_ref();
        let bytes = self.store()?.backup_to(path)?;
        info!(
            path = %self.config.path().display(),
            backup = %path.display(),
            bytes,
            "backed up store"
        );
        Ok(bytes)
    }

    /// Replaces the store contents with the backup at `path`.
    ///
    /// The backup is validated before anything changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptStore`] if the backup is invalid and
    /// [`CoreError::StoreUnavailable`] if the swap fails.
    pub fn restore_from(&self, path: impl AsRef<Path>) -> CoreResult<StoreStats> {
        let path = path.as_ref();
        let store = self.store()?;
        let stats = store.restore_from(path)?;

        let marker = ReadTx::new(store.read(), Arc::clone(&self.cipher)).cipher_marker();
        if marker.as_deref().is_some_and(|m| m != self.cipher.name()) {
            warn!(
                path = %self.config.path().display(),
                store_cipher = marker.as_deref().unwrap_or_default(),
                configured_cipher = self.cipher.name(),
                "restored store uses a different cipher"
            );
        }

        info!(
            path = %self.config.path().display(),
            backup = %path.display(),
            committed = stats.committed,
            "restored store"
        );
        Ok(stats)
    }

    /// Rewrites the store file to hold only live records.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the rewrite fails.
    pub fn compact(&self) -> CoreResult<CompactStats> {
        let stats = self.store()?.compact()?;
        info!(
            path = %self.config.path().display(),
            before = stats.before,
            after = stats.after,
            "compacted store"
        );
        Ok(stats)
    }

    /// Writes every user bucket to `path` as JSON and returns the number of
    /// records written.
    ///
    /// The document maps each bucket name to a list of `{"key", "value"}`
    /// objects in key order. Numeric keys are written as numbers. Map keys
    /// that are not strings are written as strings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if any record cannot be read and
    /// [`CoreError::StoreUnavailable`] if the file cannot be written.
    pub fn export_json(&self, path: impl AsRef<Path>) -> CoreResult<usize> {
        let path = path.as_ref();
        let (document, records) = self.view_tx(|tx| {
            let mut document = serde_json::Map::new();
            let mut records = 0;
            for bucket in tx.bucket_names() {
                let entries = tx
                    .get_all::<ciborium::Value>(&bucket)?
                    .map(|item| {
                        item.map(|(key, value)| {
                            serde_json::json!({ "key": key_json(&key), "value": cbor_to_json(value) })
                        })
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                records += entries.len();
                document.insert(bucket, serde_json::Value::Array(entries));
            }
            Ok((serde_json::Value::Object(document), records))
        })?;

        let data = serde_json::to_vec_pretty(&document)
            .map_err(|e| CoreError::invalid_argument(format!("cannot render export: {e}")))?;
        write_file_atomic(path, &data)
            .map_err(|e| CoreError::unavailable(self.config.backend, path, e))?;

        info!(path = %self.config.path().display(), export = %path.display(), records, "exported store");
        Ok(records)
    }

    /// Schema version recorded in the store; 0 if none is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if the version record is
    /// unreadable with the configured key.
    pub fn schema_version(&self) -> CoreResult<u64> {
        self.view_tx(|tx| Ok(tx.schema_version()?.unwrap_or(0)))
    }

    /// Records a new schema version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn set_schema_version(&self, version: u64) -> CoreResult<()> {
        self.update_tx(|tx| tx.set_schema_version(version))
    }

    /// Whether the store's records are sealed with a cipher.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn is_encrypted_store(&self) -> CoreResult<bool> {
        self.view_tx(|tx| {
            Ok(tx
                .cipher_marker()
                .is_some_and(|marker| marker != PassthroughCipher.name()))
        })
    }

    /// Whether a key is configured but the store still holds plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn needs_encryption_migration(&self) -> CoreResult<bool> {
        Ok(self.cipher.is_encrypting() && !self.is_encrypted_store()?)
    }

    /// Seals every plaintext record with the configured key, in one
    /// transaction, and returns how many records were sealed.
    ///
    /// Already encrypted stores are left alone and report 0.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if no key is configured or the
    /// store is sealed with another cipher.
    pub fn encrypt_store(&self) -> CoreResult<usize> {
        if !self.cipher.is_encrypting() {
            return Err(CoreError::invalid_argument("no encryption key configured"));
        }

        let sealed = self.update_tx(|tx| {
            match tx.cipher_marker() {
                Some(marker) if marker == tx.cipher().name() => return Ok(0),
                Some(marker) if marker != PassthroughCipher.name() => {
                    return Err(CoreError::invalid_argument(format!(
                        "store is sealed with {marker}"
                    )))
                }
                _ => {}
            }

            let cipher = Arc::clone(tx.cipher());
            let raw = tx.raw();
            let mut sealed = 0;
            for bucket in raw.bucket_names() {
                let Some(data) = raw.bucket(&bucket) else {
                    continue;
                };
                for (key, stored) in data.iter() {
                    if bucket == META_BUCKET && key.as_slice() == value::CIPHER_MARKER_KEY {
                        continue;
                    }
                    let bytes = cipher
                        .seal(&record_aad(&bucket, key), stored)
                        .map_err(|e| CoreError::Encoding {
                            bucket: bucket.clone(),
                            message: e.to_string(),
                        })?;
                    raw.put(&bucket, key.clone(), Bytes::from(bytes));
                    sealed += 1;
                }
            }
            tx.set_cipher_marker(cipher.name());
            Ok(sealed)
        })?;

        if sealed > 0 {
            info!(path = %self.config.path().display(), records = sealed, "encrypted store");
        }
        Ok(sealed)
    }

    /// File and bucket figures, internal buckets included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionClosed`] on a closed connection.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.store()?.stats()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.config.backend)
            .field("path", &self.config.path)
            .field("cipher", &self.cipher.name())
            .field("open", &self.is_open())
            .finish()
    }
}
