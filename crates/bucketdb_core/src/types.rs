//! Core type definitions for BucketDB.

use std::fmt;

/// Sequence number of a committed transaction.
///
/// Sequence numbers give a total order over commits. The first commit in a
/// store is 1; 0 means "nothing committed yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Key of a record within a bucket.
///
/// Keys are byte strings ordered bytewise. Numeric identifiers are stored as
/// 8-byte big-endian integers so that bucket order equals numeric order;
/// string identifiers are stored as their UTF-8 bytes.
///
/// ```
/// use bucketdb_core::Key;
///
/// assert!(Key::from(2u64) < Key::from(10u64));
/// assert_eq!(Key::from(7u64).as_id(), Some(7));
/// assert_eq!(Key::from("settings").to_string(), "settings");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    /// Creates a key from a numeric identifier.
    #[must_use]
    pub fn from_id(id: u64) -> Self {
        Self(id.to_be_bytes().to_vec())
    }

    /// Creates a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the numeric identifier if this key is exactly 8 bytes.
    #[must_use]
    pub fn as_id(&self) -> Option<u64> {
        <[u8; 8]>::try_from(self.0.as_slice())
            .ok()
            .map(u64::from_be_bytes)
    }

    /// Returns the key as UTF-8 text if it is printable text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0)
            .ok()
            .filter(|s| !s.is_empty() && !s.chars().any(char::is_control))
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the key and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<u64> for Key {
    fn from(id: u64) -> Self {
        Self::from_id(id)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.as_text() {
            return f.write_str(text);
        }
        if let Some(id) = self.as_id() {
            return write!(f, "{id}");
        }
        f.write_str("0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_next() {
        let s1 = SequenceNumber::new(5);
        assert_eq!(s1.next().as_u64(), 6);
        assert_eq!(format!("{s1}"), "seq:5");
    }

    #[test]
    fn numeric_keys_sort_numerically() {
        let mut keys: Vec<Key> = [300u64, 2, 1, 70_000].into_iter().map(Key::from).collect();
        keys.sort();
        let ids: Vec<u64> = keys.iter().filter_map(Key::as_id).collect();
        assert_eq!(ids, vec![1, 2, 300, 70_000]);
    }

    #[test]
    fn display_picks_readable_form() {
        assert_eq!(Key::from("DOCKER_HUB").to_string(), "DOCKER_HUB");
        assert_eq!(Key::from(42u64).to_string(), "42");
        assert_eq!(Key::from(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(format!("{:?}", Key::from(1)), "Key(1)");
    }
}
