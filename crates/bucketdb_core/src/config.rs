//! Connection configuration.

use crate::factory::BackendKind;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Schema version written into a store the first time it is opened.
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Clone)]
pub struct Config {
    /// Engine to open.
    pub backend: BackendKind,

    /// Path of the store file.
    pub path: PathBuf,

    /// Raw key material; `None` or empty stores plaintext.
    pub encryption_key: Option<Zeroizing<Vec<u8>>>,

    /// Whether to create the file (and its parent directories) if missing.
    pub create_if_missing: bool,

    /// Whether to fsync the store file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How long `open` keeps retrying a held file lock before giving up.
    pub lock_timeout: Duration,

    /// Schema version recorded in a brand-new store.
    pub default_schema_version: u64,

    /// Open without ever writing to the file. Write operations fail.
    pub read_only: bool,
}

impl Config {
    /// Creates a configuration with default values for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::File,
            path: path.into(),
            encryption_key: None,
            create_if_missing: true,
            sync_on_commit: true,
            lock_timeout: Duration::ZERO,
            default_schema_version: CURRENT_SCHEMA_VERSION,
            read_only: false,
        }
    }

    /// Sets the backend kind.
    #[must_use]
    pub const fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the encryption key material. An empty slice disables encryption.
    #[must_use]
    pub fn encryption_key(mut self, key: &[u8]) -> Self {
        self.encryption_key = (!key.is_empty()).then(|| Zeroizing::new(key.to_vec()));
        self
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets how long `open` waits for a held lock.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the schema version stamped into new stores.
    #[must_use]
    pub const fn default_schema_version(mut self, version: u64) -> Self {
        self.default_schema_version = version;
        self
    }

    /// Opens the store read-only. A read-only store is never created,
    /// repaired or stamped with metadata.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Returns the key material, if any.
    #[must_use]
    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref().map(Vec::as_slice)
    }

    /// Returns the store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("create_if_missing", &self.create_if_missing)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("lock_timeout", &self.lock_timeout)
            .field("default_schema_version", &self.default_schema_version)
            .field("read_only", &self.read_only)
            .finish()
    }
}
