//! Backend selection.
//!
//! The configured backend name is resolved once, at construction, into a
//! closed [`BackendKind`]. Adding an engine means adding a variant and its
//! implementation; callers keep talking to [`Connection`].

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Storage engines a [`Connection`] can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Single-file, log-structured embedded engine.
    #[default]
    File,
}

impl BackendKind {
    /// Canonical configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    /// Accepts `file` and the legacy name `boltdb`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "boltdb" => Ok(Self::File),
            _ => Err(CoreError::UnsupportedBackend { kind: s.to_string() }),
        }
    }
}

/// Builds an unopened connection for the named backend.
///
/// No I/O happens here; call [`Connection::open`] before use. An empty key
/// is the same as no key.
///
/// # Errors
///
/// Returns [`CoreError::UnsupportedBackend`] naming `kind` if it is not a
/// known backend.
///
/// # Example
///
/// ```no_run
/// let conn = bucketdb_core::new_connection("file", "/var/lib/app/app.db", None)?;
/// conn.open()?;
/// # Ok::<(), bucketdb_core::CoreError>(())
/// ```
pub fn new_connection(
    kind: &str,
    path: impl Into<PathBuf>,
    encryption_key: Option<&[u8]>,
) -> CoreResult<Connection> {
    let backend: BackendKind = kind.parse()?;
    let mut config = Config::new(path).backend(backend);
    if let Some(key) = encryption_key {
        config = config.encryption_key(key);
    }
    Connection::with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_known_names() {
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("BoltDB".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!(BackendKind::File.to_string(), "file");
    }

    #[test]
    fn unknown_backend_is_rejected_by_name() {
        let err = new_connection("unknown", "/tmp/never-created.db", None).unwrap_err();
        match err {
            CoreError::UnsupportedBackend { ref kind } => assert_eq!(kind, "unknown"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    }

    #[test]
    fn construction_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("store.db");

        let conn = new_connection("file", &path, Some(b"secret")).unwrap();
        assert!(!conn.is_open());
        assert!(conn.is_encrypting());
        assert!(!path.exists());
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn empty_key_means_plaintext() {
        let conn = new_connection("file", "/tmp/never-created.db", Some(b"")).unwrap();
        assert!(!conn.is_encrypting());
    }
}
