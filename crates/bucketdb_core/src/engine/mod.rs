//! The embedded bucket store.
//!
//! One data file holds an append-only log of committed transactions:
//!
//! ```text
//! file   := header record*
//! header := "BKDB" | version u16 | reserved u16
//! record := "BREC" | version u16 | type u8 | length u32 | payload | crc32
//! ```
//!
//! A transaction is `Begin`, its operations, then `Commit`, appended in one
//! write. On open the log is replayed into an in-memory [`Snapshot`]; a
//! trailing transaction without its `Commit` is cut off.

mod lock;
mod record;
mod replay;
mod snapshot;
mod store;
mod txn;

pub use lock::{lock_path_for, StoreLock};
pub use record::{compute_crc32, LogRecord, Op, RecordError, RecordType};
pub use snapshot::{BucketData, Snapshot};
pub use store::{
    verify, BucketStats, CompactStats, Store, StoreOptions, StoreStats, VerifyReport,
};
pub use txn::{ReadTxn, WriteTxn};
