//! Log record types and serialization.

use crate::types::SequenceNumber;
use bytes::Bytes;
use thiserror::Error;

/// Magic bytes at the start of every store file.
pub const FILE_MAGIC: [u8; 4] = *b"BKDB";

/// Current store file format version.
pub const FILE_VERSION: u16 = 1;

/// File header: magic (4) + version (2) + reserved (2).
pub const FILE_HEADER_SIZE: usize = 8;

/// Magic bytes identifying a log record.
pub const RECORD_MAGIC: [u8; 4] = *b"BREC";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// Record header: magic (4) + version (2) + type (1) + length (4).
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Returns the file header for a fresh store.
#[must_use]
pub fn file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[0..4].copy_from_slice(&FILE_MAGIC);
    header[4..6].copy_from_slice(&FILE_VERSION.to_le_bytes());
    header
}

/// Why a record could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The buffer ends before the record does.
    #[error("record truncated")]
    Truncated,

    /// The record does not start with the record magic.
    #[error("invalid record magic")]
    BadMagic,

    /// The record was written by a newer format.
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u16),

    /// The type byte names no known record.
    #[error("unknown record type {0}")]
    UnknownType(u8),

    /// The stored checksum does not match the record bytes.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum found in the file.
        stored: u32,
        /// Checksum of the bytes read.
        computed: u32,
    },

    /// The payload does not match its record type.
    #[error("malformed {kind} payload: {message}")]
    Malformed {
        /// Record type being decoded.
        kind: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A field is too large for the format.
    #[error("{0} too large for the log format")]
    TooLarge(&'static str),
}

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Start of a transaction.
    Begin = 1,
    /// Insert or overwrite a record.
    Put = 2,
    /// Remove a record.
    Delete = 3,
    /// Set a bucket's sequence counter.
    Sequence = 4,
    /// Create an empty bucket.
    CreateBucket = 5,
    /// Remove a bucket and its records.
    DropBucket = 6,
    /// End of a transaction.
    Commit = 7,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Sequence),
            5 => Some(Self::CreateBucket),
            6 => Some(Self::DropBucket),
            7 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Begin => "Begin",
            Self::Put => "Put",
            Self::Delete => "Delete",
            Self::Sequence => "Sequence",
            Self::CreateBucket => "CreateBucket",
            Self::DropBucket => "DropBucket",
            Self::Commit => "Commit",
        }
    }
}

/// A single mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Insert or overwrite `key` in `bucket`, creating the bucket if needed.
    Put {
        /// Bucket name.
        bucket: String,
        /// Record key.
        key: Vec<u8>,
        /// Stored (sealed) value.
        value: Bytes,
    },
    /// Remove `key` from `bucket`.
    Delete {
        /// Bucket name.
        bucket: String,
        /// Record key.
        key: Vec<u8>,
    },
    /// Set the sequence counter of `bucket`.
    Sequence {
        /// Bucket name.
        bucket: String,
        /// New counter value.
        value: u64,
    },
    /// Create `bucket` if it does not exist.
    CreateBucket {
        /// Bucket name.
        bucket: String,
    },
    /// Remove `bucket` with all its records.
    DropBucket {
        /// Bucket name.
        bucket: String,
    },
}

impl Op {
    fn record_type(&self) -> RecordType {
        match self {
            Self::Put { .. } => RecordType::Put,
            Self::Delete { .. } => RecordType::Delete,
            Self::Sequence { .. } => RecordType::Sequence,
            Self::CreateBucket { .. } => RecordType::CreateBucket,
            Self::DropBucket { .. } => RecordType::DropBucket,
        }
    }
}

/// A record in the store log.
///
/// A committed transaction is a `Begin`, zero or more `Op` records, and a
/// `Commit` carrying the same sequence number and the number of operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Start of a transaction.
    Begin {
        /// Sequence number the transaction commits as.
        sequence: SequenceNumber,
    },
    /// A mutation.
    Op(Op),
    /// End of a transaction.
    Commit {
        /// Sequence number of the transaction.
        sequence: SequenceNumber,
        /// Number of operations between `Begin` and `Commit`.
        op_count: u32,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Op(op) => op.record_type(),
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    /// Appends the full record (envelope, payload and checksum) to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::TooLarge`] if a field does not fit its 4-byte
    /// length prefix.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RecordError> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len()).map_err(|_| RecordError::TooLarge("record"))?;

        let start = out.len();
        out.reserve(HEADER_SIZE + payload.len() + CRC_SIZE);
        out.extend_from_slice(&RECORD_MAGIC);
        out.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        out.push(self.record_type().as_byte());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);

        let crc = compute_crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    fn encode_payload(&self) -> Result<Vec<u8>, RecordError> {
        let mut buf = Vec::new();

        match self {
            Self::Begin { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
            Self::Commit { sequence, op_count } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                buf.extend_from_slice(&op_count.to_le_bytes());
            }
            Self::Op(Op::Put { bucket, key, value }) => {
                put_bytes(&mut buf, bucket.as_bytes(), "bucket name")?;
                put_bytes(&mut buf, key, "key")?;
                put_bytes(&mut buf, value, "value")?;
            }
            Self::Op(Op::Delete { bucket, key }) => {
                put_bytes(&mut buf, bucket.as_bytes(), "bucket name")?;
                put_bytes(&mut buf, key, "key")?;
            }
            Self::Op(Op::Sequence { bucket, value }) => {
                put_bytes(&mut buf, bucket.as_bytes(), "bucket name")?;
                buf.extend_from_slice(&value.to_le_bytes());
            }
            Self::Op(Op::CreateBucket { bucket } | Op::DropBucket { bucket }) => {
                put_bytes(&mut buf, bucket.as_bytes(), "bucket name")?;
            }
        }

        Ok(buf)
    }

    /// Reads one record from the start of `data`.
    ///
    /// Returns the record and the number of bytes it occupies.
    ///
    /// # Errors
    ///
    /// [`RecordError::Truncated`] means `data` ends inside the record, which
    /// after a crash is a torn write. Every other error is corruption.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), RecordError> {
        if data.len() < HEADER_SIZE {
            return Err(RecordError::Truncated);
        }

        if data[0..4] != RECORD_MAGIC {
            return Err(RecordError::BadMagic);
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        let record_type = RecordType::from_byte(data[6]).ok_or(RecordError::UnknownType(data[6]))?;
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if data.len() < total {
            return Err(RecordError::Truncated);
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = compute_crc32(&data[..body_end]);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch { stored, computed });
        }

        let record = Self::decode_payload(record_type, &data[HEADER_SIZE..body_end])?;
        Ok((record, total))
    }

    fn decode_payload(record_type: RecordType, payload: &[u8]) -> Result<Self, RecordError> {
        let mut reader = PayloadReader {
            kind: record_type.name(),
            payload,
            cursor: 0,
        };

        let record = match record_type {
            RecordType::Begin => Self::Begin {
                sequence: SequenceNumber::new(reader.u64()?),
            },
            RecordType::Commit => Self::Commit {
                sequence: SequenceNumber::new(reader.u64()?),
                op_count: reader.u32()?,
            },
            RecordType::Put => Self::Op(Op::Put {
                bucket: reader.string()?,
                key: reader.bytes()?.to_vec(),
                value: Bytes::copy_from_slice(reader.bytes()?),
            }),
            RecordType::Delete => Self::Op(Op::Delete {
                bucket: reader.string()?,
                key: reader.bytes()?.to_vec(),
            }),
            RecordType::Sequence => Self::Op(Op::Sequence {
                bucket: reader.string()?,
                value: reader.u64()?,
            }),
            RecordType::CreateBucket => Self::Op(Op::CreateBucket {
                bucket: reader.string()?,
            }),
            RecordType::DropBucket => Self::Op(Op::DropBucket {
                bucket: reader.string()?,
            }),
        };

        reader.finish()?;
        Ok(record)
    }
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8], what: &'static str) -> Result<(), RecordError> {
    let len = u32::try_from(data.len()).map_err(|_| RecordError::TooLarge(what))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

struct PayloadReader<'a> {
    kind: &'static str,
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn malformed(&self, message: impl Into<String>) -> RecordError {
        RecordError::Malformed {
            kind: self.kind,
            message: message.into(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordError> {
        let end = self
            .cursor
            .checked_add(n)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| self.malformed("unexpected end of payload"))?;
        let slice = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, RecordError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, RecordError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn bytes(&mut self) -> Result<&'a [u8], RecordError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, RecordError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.malformed("bucket name is not UTF-8"))
    }

    fn finish(&self) -> Result<(), RecordError> {
        if self.cursor == self.payload.len() {
            Ok(())
        } else {
            Err(self.malformed(format!(
                "trailing bytes: expected {} bytes, got {}",
                self.cursor,
                self.payload.len()
            )))
        }
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected.
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
