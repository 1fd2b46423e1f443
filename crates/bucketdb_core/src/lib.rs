//! # BucketDB Core
//!
//! Embedded, bucket-oriented object store.
//!
//! This crate provides:
//! - An append-only, checksummed store file with crash recovery
//! - Atomic multi-bucket transactions over copy-on-write snapshots
//! - Typed objects encoded with the CBOR codec, optionally sealed with AES-256-GCM
//! - Per-bucket identifier sequences
//! - Backup, restore, compaction, JSON export and schema migrations
//!
//! ## Example
//!
//! ```no_run
//! use bucketdb_core::new_connection;
//!
//! let conn = new_connection("file", "/var/lib/app/app.db", None)?;
//! conn.open()?;
//!
//! let id = conn.create_object("settings", &serde_json::json!({ "theme": "dark" }))?;
//! let settings: Option<serde_json::Value> = conn.get_object("settings", id)?;
//! assert!(settings.is_some());
//!
//! conn.close()?;
//! # Ok::<(), bucketdb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
pub mod crypto;
pub mod engine;
mod error;
mod factory;
mod migration;
mod types;

pub use config::{Config, CURRENT_SCHEMA_VERSION};
pub use connection::{Connection, Objects, ReadTx, WriteTx};
pub use engine::{verify, BucketStats, CompactStats, StoreStats, VerifyReport};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use factory::{new_connection, BackendKind};
pub use migration::{Migration, MigrationInfo, MigrationReport, Migrator};
pub use types::{Key, SequenceNumber};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
