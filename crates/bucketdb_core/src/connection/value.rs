//! Typed values to stored bytes and back: codec, then cipher.

use crate::crypto::{record_aad, Cipher};
use crate::error::{CoreError, CoreResult};
use crate::types::Key;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bucket holding store metadata.
pub(crate) const META_BUCKET: &str = "__meta";

/// Metadata key of the schema version.
pub(crate) const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Metadata key of the cipher marker. Stored raw, never sealed.
pub(crate) const CIPHER_MARKER_KEY: &[u8] = b"cipher";

const RESERVED_PREFIX: &str = "__";

/// Whether `name` is reserved for internal metadata.
pub(crate) fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Rejects empty and reserved bucket names.
pub(crate) fn validate_bucket(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_argument("bucket name must not be empty"));
    }
    if is_reserved(name) {
        return Err(CoreError::invalid_argument(format!(
            "bucket name {name} is reserved"
        )));
    }
    Ok(())
}

pub(crate) fn seal<T: Serialize + ?Sized>(
    cipher: &dyn Cipher,
    bucket: &str,
    key: &[u8],
    value: &T,
) -> CoreResult<Bytes> {
    let encoded = bucketdb_codec::encode(value).map_err(|e| CoreError::Encoding {
        bucket: bucket.to_string(),
        message: e.to_string(),
    })?;
    let sealed = cipher
        .seal(&record_aad(bucket, key), &encoded)
        .map_err(|e| CoreError::Encoding {
            bucket: bucket.to_string(),
            message: e.to_string(),
        })?;
    Ok(Bytes::from(sealed))
}

pub(crate) fn open<T: DeserializeOwned>(
    cipher: &dyn Cipher,
    bucket: &str,
    key: &[u8],
    stored: &[u8],
) -> CoreResult<T> {
    let plain = cipher
        .open(&record_aad(bucket, key), stored)
        .map_err(|e| CoreError::corrupt_record(bucket, Key::from(key), e))?;
    bucketdb_codec::decode(&plain).map_err(|e| CoreError::corrupt_record(bucket, Key::from(key), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher_for;
    use crate::error::ErrorKind;

    #[test]
    fn bucket_names_are_checked() {
        assert!(validate_bucket("endpoints").is_ok());
        assert_eq!(
            validate_bucket("").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            validate_bucket("__meta").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(validate_bucket("_single").is_ok());
    }

    #[test]
    fn sealed_value_is_bound_to_its_key() {
        let cipher = cipher_for(Some(b"k")).unwrap();
        let stored = seal(cipher.as_ref(), "users", b"1", &"alice").unwrap();

        let name: String = open(cipher.as_ref(), "users", b"1", &stored).unwrap();
        assert_eq!(name, "alice");

        let err = open::<String>(cipher.as_ref(), "users", b"2", &stored).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
    }

    #[test]
    fn undecodable_bytes_are_corrupt_records() {
        let cipher = cipher_for(None).unwrap();
        let err = open::<u64>(cipher.as_ref(), "users", b"1", b"\x7fjunk").unwrap_err();
        assert!(err.to_string().contains("bucket users"));
        assert_eq!(err.kind(), ErrorKind::CorruptRecord);
    }
}
