//! Payload format tags.

use crate::error::{CodecError, CodecResult};

/// Serialization format recorded in the first byte of every payload.
///
/// New formats get a new tag; existing tags are never reused, so stores
/// written by older releases stay decodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Format {
    /// CBOR (RFC 8949) produced by serde, first revision.
    CborV1 = 0x01,
}

impl Format {
    /// Format used by [`encode`](crate::encode).
    pub const CURRENT: Self = Self::CborV1;

    /// Converts a tag byte to a format.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::CborV1),
            _ => None,
        }
    }

    /// Returns the tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Splits a payload into its format and body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::EmptyPayload`] or [`CodecError::UnknownFormat`].
    pub fn split(payload: &[u8]) -> CodecResult<(Self, &[u8])> {
        let (&tag, body) = payload.split_first().ok_or(CodecError::EmptyPayload)?;
        let format = Self::from_byte(tag).ok_or(CodecError::UnknownFormat { tag })?;
        Ok((format, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        assert_eq!(Format::from_byte(Format::CborV1.as_byte()), Some(Format::CborV1));
        assert_eq!(Format::from_byte(0x00), None);
    }

    #[test]
    fn split_rejects_empty_and_unknown() {
        assert_eq!(Format::split(&[]), Err(CodecError::EmptyPayload));
        assert_eq!(
            Format::split(&[0x7F, 1, 2]),
            Err(CodecError::UnknownFormat { tag: 0x7F })
        );
        let (format, body) = Format::split(&[0x01, 0xA0]).unwrap();
        assert_eq!(format, Format::CborV1);
        assert_eq!(body, &[0xA0]);
    }
}
