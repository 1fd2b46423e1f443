//! Rendering stored CBOR values as JSON.
//!
//! CBOR is a superset of the JSON data model. Map keys that are not text
//! become strings, byte strings become `0x`-prefixed hex, and tags are
//! dropped in favour of the value they wrap.

use crate::types::Key;
use ciborium::Value as Cbor;
use serde_json::{Map, Number, Value as Json};
use std::fmt::Write;

/// Export form of a record key. Numeric keys are written as numbers.
pub(super) fn key_json(key: &Key) -> Json {
    if let Some(text) = key.as_text() {
        Json::String(text.to_string())
    } else if let Some(id) = key.as_id() {
        Json::from(id)
    } else {
        Json::String(key.to_string())
    }
}

/// Converts a decoded record value to JSON.
pub(super) fn cbor_to_json(value: Cbor) -> Json {
    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(b),
        Cbor::Integer(n) => integer_json(i128::from(n)),
        Cbor::Float(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
        Cbor::Text(s) => Json::String(s),
        Cbor::Bytes(bytes) => Json::String(hex(&bytes)),
        Cbor::Tag(_, inner) => cbor_to_json(*inner),
        Cbor::Array(items) => Json::Array(items.into_iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => Json::Object(
            entries
                .into_iter()
                .map(|(k, v)| (map_key(k), cbor_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        _ => Json::Null,
    }
}

fn integer_json(n: i128) -> Json {
    if let Ok(n) = u64::try_from(n) {
        Json::from(n)
    } else if let Ok(n) = i64::try_from(n) {
        Json::from(n)
    } else {
        Json::String(n.to_string())
    }
}

fn map_key(key: Cbor) -> String {
    match key {
        Cbor::Text(s) => s,
        Cbor::Integer(n) => i128::from(n).to_string(),
        Cbor::Bytes(bytes) => hex(&bytes),
        other => match cbor_to_json(other) {
            Json::String(s) => s,
            json => json.to_string(),
        },
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip<T: serde::Serialize>(value: &T) -> Json {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).unwrap();
        cbor_to_json(ciborium::from_reader(buf.as_slice()).unwrap())
    }

    #[test]
    fn integer_map_keys_become_strings() {
        let map: std::collections::BTreeMap<u32, &str> = [(7, "rw"), (12, "r")].into();
        assert_eq!(roundtrip(&map), json!({ "7": "rw", "12": "r" }));
    }

    #[test]
    fn bytes_render_as_hex() {
        let value = Cbor::Map(vec![(
            Cbor::Bytes(vec![0xde, 0xad]),
            Cbor::Bytes(vec![0x01]),
        )]);
        assert_eq!(cbor_to_json(value), json!({ "0xdead": "0x01" }));
    }

    #[test]
    fn nested_structures_keep_their_shape() {
        let value = json!({ "name": "alice", "tags": ["a", "b"], "age": 42, "score": -1.5 });
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn wide_integers_fall_back_to_strings() {
        assert_eq!(integer_json(u64::MAX as i128), json!(u64::MAX));
        assert_eq!(integer_json(-5), json!(-5));
        assert_eq!(integer_json(i128::from(u64::MAX) + 1), json!("18446744073709551616"));
    }
}
