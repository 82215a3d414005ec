use bytes::Bytes;

use crate::key::Key;

/// A single query result row: a key and its value.
///
/// The value is an opaque byte payload. Stores never interpret it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair {
    pub key: Key,
    pub value: Bytes,
}

impl Pair {
    pub fn new(key: Key, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// A pair with an empty value, as produced by keys-only queries.
    pub fn key_only(key: Key) -> Self {
        Self::new(key, Bytes::new())
    }
}

impl From<(Key, Bytes)> for Pair {
    fn from((key, value): (Key, Bytes)) -> Self {
        Self { key, value }
    }
}
