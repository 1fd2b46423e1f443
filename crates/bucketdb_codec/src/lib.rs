//! # BucketDB Codec
//!
//! Turns typed values into the bytes BucketDB stores, and back.
//!
//! Every payload is `format tag (1) || body`. The only format today is
//! CBOR produced through serde, which is self-describing: fields are stored
//! by name, so a struct that gains a field marked `#[serde(default)]` still
//! decodes payloads written before the field existed.
//!
//! ## Usage
//!
//! ```
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Endpoint {
//!     id: u64,
//!     name: String,
//! }
//!
//! let endpoint = Endpoint { id: 1, name: "local".into() };
//! let bytes = bucketdb_codec::encode(&endpoint).unwrap();
//! let decoded: Endpoint = bucketdb_codec::decode(&bytes).unwrap();
//! assert_eq!(endpoint, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod format;

pub use error::{CodecError, CodecResult};
pub use format::Format;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value into a tagged payload.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serde rejects the value, e.g. a
/// map with non-string keys that a custom serializer refuses.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = vec![Format::CURRENT.as_byte()];
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a tagged payload into a value.
///
/// # Errors
///
/// Returns an error if the payload is empty, carries an unknown format tag,
/// is not well-formed for that format, does not match `T`'s shape, or has
/// bytes left over after the value.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> CodecResult<T> {
    let (format, body) = Format::split(payload)?;
    match format {
        Format::CborV1 => decode_cbor(body),
    }
}

fn decode_cbor<T: DeserializeOwned>(body: &[u8]) -> CodecResult<T> {
    let mut reader = body;
    let value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.len(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Registry {
        id: u64,
        name: String,
        url: String,
        authentication: bool,
        labels: BTreeMap<String, String>,
        teams: Vec<u32>,
        quota: Option<i64>,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct RegistryV1 {
        id: u64,
        name: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct RegistryV2 {
        id: u64,
        name: String,
        #[serde(default)]
        insecure: bool,
        #[serde(default)]
        mirrors: Vec<String>,
    }

    #[test]
    fn payload_starts_with_format_tag() {
        let bytes = encode(&42u32).unwrap();
        assert_eq!(bytes[0], Format::CborV1.as_byte());
    }

    #[test]
    fn roundtrip_struct() {
        let registry = Registry {
            id: 7,
            name: "dockerhub".into(),
            url: "docker.io".into(),
            authentication: true,
            labels: BTreeMap::from([("env".into(), "prod".into())]),
            teams: vec![1, 2, 3],
            quota: None,
        };
        let bytes = encode(&registry).unwrap();
        assert_eq!(decode::<Registry>(&bytes).unwrap(), registry);
    }

    #[test]
    fn roundtrip_json_value() {
        let value = serde_json::json!({"x": 1, "nested": {"list": [true, null, "s"]}});
        let bytes = encode(&value).unwrap();
        assert_eq!(decode::<serde_json::Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn added_optional_fields_decode_as_defaults() {
        let old = RegistryV1 {
            id: 3,
            name: "quay".into(),
        };
        let bytes = encode(&old).unwrap();

        let new: RegistryV2 = decode(&bytes).unwrap();
        assert_eq!(new.id, 3);
        assert_eq!(new.name, "quay");
        assert!(!new.insecure);
        assert!(new.mirrors.is_empty());
    }

    #[test]
    fn shape_mismatch_fails() {
        let bytes = encode(&"just a string").unwrap();
        assert!(matches!(
            decode::<RegistryV1>(&bytes),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn malformed_body_fails() {
        // Map header announcing one entry, then nothing.
        let result = decode::<serde_json::Value>(&[Format::CborV1.as_byte(), 0xA1]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut bytes = encode(&1u8).unwrap();
        bytes.push(0x00);
        assert_eq!(
            decode::<u8>(&bytes),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn unknown_tag_fails() {
        let mut bytes = encode(&1u8).unwrap();
        bytes[0] = 0xEE;
        assert_eq!(
            decode::<u8>(&bytes),
            Err(CodecError::UnknownFormat { tag: 0xEE })
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            id in any::<u64>(),
            name in ".*",
            url in "[a-z]{0,20}",
            authentication in any::<bool>(),
            labels in proptest::collection::btree_map("[a-z]{1,8}", ".*", 0..8),
            teams in proptest::collection::vec(any::<u32>(), 0..16),
            quota in proptest::option::of(any::<i64>()),
        ) {
            let registry = Registry { id, name, url, authentication, labels, teams, quota };
            let bytes = encode(&registry).unwrap();
            prop_assert_eq!(decode::<Registry>(&bytes).unwrap(), registry);
        }

        #[test]
        fn prop_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode::<serde_json::Value>(&bytes);
        }
    }
}
