//! Error types for BucketDB core.

use crate::factory::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`], for callers that branch on
/// the kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration names a backend this build does not provide.
    UnsupportedBackend,
    /// Lock contention, permissions, disk full or other I/O trouble.
    StoreUnavailable,
    /// Operation issued on a connection that is not open.
    ConnectionClosed,
    /// A record failed to decrypt or decode.
    CorruptRecord,
    /// The store file itself failed validation.
    CorruptStore,
    /// The caller passed something the store rejects.
    InvalidInput,
    /// A migration step failed.
    Migration,
}

/// Errors that can occur in BucketDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested backend kind is not known.
    #[error("unknown storage backend: {kind}")]
    UnsupportedBackend {
        /// The offending backend name.
        kind: String,
    },

    /// The backing store cannot be reached or written.
    #[error("{backend} store at {} unavailable: {reason}", path.display())]
    StoreUnavailable {
        /// Backend that failed.
        backend: BackendKind,
        /// Store file path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The connection is not open.
    #[error("connection to {} is closed", path.display())]
    ConnectionClosed {
        /// Store file path.
        path: PathBuf,
    },

    /// A stored record could not be decrypted or decoded.
    #[error("corrupt record {key} in bucket {bucket}: {reason}")]
    CorruptRecord {
        /// Bucket holding the record.
        bucket: String,
        /// Record key, rendered for display.
        key: String,
        /// Decrypt or decode failure.
        reason: String,
    },

    /// The store file failed structural validation.
    #[error("corrupt store {} at offset {offset}: {message}", path.display())]
    CorruptStore {
        /// Store file path.
        path: PathBuf,
        /// Byte offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// An insert targeted a key that already exists.
    #[error("key {key} already exists in bucket {bucket}")]
    DuplicateKey {
        /// Bucket name.
        bucket: String,
        /// Conflicting key, rendered for display.
        key: String,
    },

    /// A value could not be serialized.
    #[error("cannot encode value for bucket {bucket}: {message}")]
    Encoding {
        /// Target bucket.
        bucket: String,
        /// Codec message.
        message: String,
    },

    /// Invalid argument supplied.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A migration step failed and was rolled back.
    #[error("migration to version {version} failed: {message}")]
    MigrationFailed {
        /// Version the migration would have produced.
        version: u64,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedBackend { .. } => ErrorKind::UnsupportedBackend,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Self::CorruptRecord { .. } => ErrorKind::CorruptRecord,
            Self::CorruptStore { .. } => ErrorKind::CorruptStore,
            Self::DuplicateKey { .. } | Self::Encoding { .. } | Self::InvalidArgument { .. } => {
                ErrorKind::InvalidInput
            }
            Self::MigrationFailed { .. } => ErrorKind::Migration,
        }
    }

    /// Creates a store unavailable error.
    pub fn unavailable(
        backend: BackendKind,
        path: impl Into<PathBuf>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::StoreUnavailable {
            backend,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt_record(
        bucket: impl Into<String>,
        key: impl std::fmt::Display,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::CorruptRecord {
            bucket: bucket.into(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a corrupt store error.
    pub fn corrupt_store(path: impl Into<PathBuf>, offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(version: u64, message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            version,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = CoreError::corrupt_record("endpoints", crate::Key::from(3u64), "bad tag");
        assert_eq!(err.to_string(), "corrupt record 3 in bucket endpoints: bad tag");
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);

        let err = CoreError::unavailable(BackendKind::File, "/data/app.db", "locked");
        assert_eq!(err.to_string(), "file store at /data/app.db unavailable: locked");
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn unsupported_backend_names_value() {
        let err = CoreError::UnsupportedBackend {
            kind: "unknown".into(),
        };
        assert!(err.to_string().contains("unknown"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    }
}
