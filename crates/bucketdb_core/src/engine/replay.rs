//! Rebuilding committed state from the log.

use super::record::{
    LogRecord, Op, RecordError, FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION, RECORD_MAGIC,
};
use super::snapshot::Snapshot;
use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use std::path::Path;

/// Outcome of replaying a store file.
#[derive(Debug)]
pub struct Replayed {
    /// State after the last committed transaction.
    pub snapshot: Snapshot,
    /// Bytes up to and including the last committed transaction.
    pub valid_len: u64,
    /// Number of committed transactions.
    pub transactions: u64,
    /// Number of records in committed transactions.
    pub records: u64,
}

impl Replayed {
    /// Whether bytes past the last commit must be discarded.
    #[must_use]
    pub fn has_torn_tail(&self, file_len: u64) -> bool {
        self.valid_len < file_len
    }
}

struct Pending {
    sequence: SequenceNumber,
    ops: Vec<Op>,
}

/// Replays `data`, the full contents of the store at `path`.
///
/// An empty buffer is a fresh store. Only transactions closed by a matching
/// `Commit` are applied. A record cut short at the end of the buffer, or a
/// transaction still open when the buffer ends, is a torn write and is left
/// out of `valid_len`. A record that overruns the buffer while a valid record
/// still follows it has a damaged length and is corruption.
///
/// # Errors
///
/// Returns [`CoreError::CorruptStore`] for a bad header, a record failing
/// validation, or records that break transaction framing.
pub fn replay(data: &[u8], path: &Path) -> CoreResult<Replayed> {
    let mut replayed = Replayed {
        snapshot: Snapshot::default(),
        valid_len: 0,
        transactions: 0,
        records: 0,
    };

    if data.is_empty() {
        return Ok(replayed);
    }

    if data.len() < FILE_HEADER_SIZE {
        // A crash while creating the file leaves a prefix of the header.
        if FILE_MAGIC.starts_with(&data[..data.len().min(4)]) {
            return Ok(replayed);
        }
        return Err(CoreError::corrupt_store(path, 0, "not a bucketdb store"));
    }

    if data[0..4] != FILE_MAGIC {
        return Err(CoreError::corrupt_store(path, 0, "not a bucketdb store"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > FILE_VERSION {
        return Err(CoreError::corrupt_store(
            path,
            4,
            format!("unsupported file format version {version}"),
        ));
    }

    let mut offset = FILE_HEADER_SIZE;
    replayed.valid_len = offset as u64;
    let mut pending: Option<Pending> = None;
    let mut last_committed: Option<SequenceNumber> = None;

    while offset < data.len() {
        let (record, len) = match LogRecord::decode(&data[offset..]) {
            Ok(decoded) => decoded,
            Err(RecordError::Truncated) => {
                // A torn write only ever cuts the last record short.
                if let Some(next) = next_valid_record(data, offset + 1) {
                    return Err(CoreError::corrupt_store(
                        path,
                        offset as u64,
                        format!("record length runs past a valid record at offset {next}"),
                    ));
                }
                break;
            }
            Err(e) => return Err(CoreError::corrupt_store(path, offset as u64, e.to_string())),
        };

        let framing = |message: &str| CoreError::corrupt_store(path, offset as u64, message);

        match record {
            LogRecord::Begin { sequence } => {
                if pending.is_some() {
                    return Err(framing("transaction begins inside another"));
                }
                if last_committed.is_some_and(|last| sequence <= last) {
                    return Err(framing("sequence number does not increase"));
                }
                pending = Some(Pending {
                    sequence,
                    ops: Vec::new(),
                });
            }
            LogRecord::Op(op) => match pending.as_mut() {
                Some(tx) => tx.ops.push(op),
                None => return Err(framing("operation outside a transaction")),
            },
            LogRecord::Commit { sequence, op_count } => {
                let tx = pending
                    .take()
                    .ok_or_else(|| framing("commit without a transaction"))?;
                if tx.sequence != sequence {
                    return Err(framing("commit sequence does not match its begin"));
                }
                if tx.ops.len() != op_count as usize {
                    return Err(framing("commit operation count does not match"));
                }

                for op in &tx.ops {
                    replayed.snapshot.apply(op);
                }
                replayed.snapshot.set_committed(sequence);
                replayed.records += tx.ops.len() as u64 + 2;
                replayed.transactions += 1;
                replayed.valid_len = (offset + len) as u64;
                last_committed = Some(sequence);
            }
        }

        offset += len;
    }

    Ok(replayed)
}

/// Offset of the first record at or after `from` that passes validation.
fn next_valid_record(data: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while pos + RECORD_MAGIC.len() <= data.len() {
        let found = data[pos..]
            .windows(RECORD_MAGIC.len())
            .position(|w| w == RECORD_MAGIC)?;
        pos += found;
        if LogRecord::decode(&data[pos..]).is_ok() {
            return Some(pos);
        }
        pos += 1;
    }
    None
}
