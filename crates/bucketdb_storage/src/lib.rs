//! # BucketDB Storage
//!
//! Byte-store backends underneath the BucketDB engine.
//!
//! Backends are **opaque byte stores**: the engine in `bucketdb_core` owns the
//! log format, the backends only read, append, truncate and atomically replace
//! bytes.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one data file on disk, replaced via write-then-rename
//! - [`InMemoryBackend`] - for tests and throwaway stores
//!
//! ## Example
//!
//! ```rust
//! use bucketdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{write_file_atomic, FileBackend};
pub use memory::InMemoryBackend;
