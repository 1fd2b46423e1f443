//! Lazy iteration over a bucket.

use super::value;
use crate::crypto::Cipher;
use crate::engine::BucketData;
use crate::error::CoreResult;
use crate::types::Key;
use serde::de::DeserializeOwned;
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

/// Key-ordered records of one bucket, decoded on demand.
///
/// The iterator reads the snapshot it was created from; later commits do not
/// change what it yields. A record that fails to decrypt or decode yields an
/// `Err` item and iteration continues with the next key.
///
/// ```no_run
/// # use bucketdb_core::{Connection, Config};
/// # let conn = Connection::with_config(Config::new("app.db"))?;
/// # conn.open()?;
/// for item in conn.get_all::<serde_json::Value>("endpoints")? {
///     let (key, endpoint) = item?;
///     println!("{key}: {endpoint}");
/// }
/// # Ok::<(), bucketdb_core::CoreError>(())
/// ```
pub struct Objects<T> {
    bucket: String,
    data: Option<Arc<BucketData>>,
    prefix: Vec<u8>,
    cursor: Option<Vec<u8>>,
    cipher: Arc<dyn Cipher>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Objects<T> {
    pub(crate) fn new(
        bucket: &str,
        data: Option<Arc<BucketData>>,
        prefix: Vec<u8>,
        cipher: Arc<dyn Cipher>,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            done: data.is_none(),
            data,
            prefix,
            cursor: None,
            cipher,
            _marker: PhantomData,
        }
    }

    /// Returns the bucket being iterated.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl<T: DeserializeOwned> Iterator for Objects<T> {
    type Item = CoreResult<(Key, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let data = Arc::clone(self.data.as_ref()?);

        let entry = match &self.cursor {
            Some(last) => data.next_after(Some(last.as_slice())),
            None => data.first_at_or_after(&self.prefix),
        };
        let Some((key, stored)) = entry.filter(|(key, _)| key.starts_with(&self.prefix)) else {
            self.done = true;
            return None;
        };

        self.cursor = Some(key.clone());
        let item = value::open(self.cipher.as_ref(), &self.bucket, key, stored)
            .map(|object| (Key::from_bytes(key.clone()), object));
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match (&self.data, self.done) {
            (Some(data), false) => (0, Some(data.len())),
            _ => (0, Some(0)),
        }
    }
}

impl<T: DeserializeOwned> FusedIterator for Objects<T> {}

impl<T> fmt::Debug for Objects<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Objects")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
