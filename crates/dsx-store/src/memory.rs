use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use dsx_types::{Key, Pair};

use crate::error::{StoreError, StoreResult};
use crate::query::{refine, KeyQuery, Query};
use crate::stream::{self, BoxStream};
use crate::traits::{Batch, Datastore};

type Data = Arc<RwLock<BTreeMap<Key, Bytes>>>;

/// In-memory, `BTreeMap`-based datastore.
///
/// Intended for tests and embedding. Entries live behind a `RwLock` and are
/// cloned on read. Queries snapshot the matching entries when they are
/// created, so writes made while a query stream is being consumed are not
/// observed by it.
pub struct MemoryDatastore {
    data: Data,
}

impl MemoryDatastore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.data.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().expect("lock poisoned").is_empty()
    }

    /// All keys in key order.
    pub fn keys(&self) -> Vec<Key> {
        self.data
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.data.write().expect("lock poisoned").clear();
    }

    fn snapshot(&self, prefix: Option<&str>) -> Vec<(Key, Bytes)> {
        let map = self.data.read().expect("lock poisoned");
        map.iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.as_str().starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        let mut map = self.data.write().expect("lock poisoned");
        map.insert(key.clone(), value);
        Ok(())
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        let map = self.data.read().expect("lock poisoned");
        map.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        let map = self.data.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        let mut map = self.data.write().expect("lock poisoned");
        map.remove(key);
        Ok(())
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(MemoryBatch {
            data: Arc::clone(&self.data),
            ops: Vec::new(),
        })
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        let keys_only = query.keys_only;
        let pairs = self
            .snapshot(query.prefix.as_deref())
            .into_iter()
            .map(move |(key, value)| {
                if keys_only {
                    Pair::key_only(key)
                } else {
                    Pair::new(key, value)
                }
            });
        refine(stream::iter(pairs), &query)
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        let keys = self
            .snapshot(query.prefix.as_deref())
            .into_iter()
            .map(|(key, _)| key);
        refine(stream::iter(keys), &query)
    }
}

impl std::fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatastore")
            .field("entries", &self.len())
            .finish()
    }
}

enum Op {
    Put(Key, Bytes),
    Delete(Key),
}

/// Batch applied to a [`MemoryDatastore`] under a single write lock.
struct MemoryBatch {
    data: Data,
    ops: Vec<Op>,
}

#[async_trait]
impl Batch for MemoryBatch {
    fn put(&mut self, key: Key, value: Bytes) -> StoreResult<()> {
        self.ops.push(Op::Put(key, value));
        Ok(())
    }

    fn delete(&mut self, key: Key) -> StoreResult<()> {
        self.ops.push(Op::Delete(key));
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut map = self.data.write().expect("lock poisoned");
        for op in self.ops.drain(..) {
            match op {
                Op::Put(key, value) => {
                    map.insert(key, value);
                }
                Op::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
