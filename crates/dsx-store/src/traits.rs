use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dsx_types::{Key, Pair};

use crate::error::StoreResult;
use crate::query::{KeyQuery, Query};
use crate::stream::{BoxStream, DataStream};

/// A shared handle to any datastore.
pub type SharedDatastore = Arc<dyn Datastore>;

/// The minimal key-value storage contract every store and adapter satisfies.
///
/// All implementations must uphold these rules:
/// - Values are opaque bytes. A store never parses what it holds.
/// - `put` of an existing key overwrites it; `delete` of an absent key is
///   not an error.
/// - `get` of an absent key fails with [`StoreError::NotFound`].
/// - Queries are lazy: nothing is read until the returned stream is pulled.
///
/// [`StoreError::NotFound`]: crate::StoreError::NotFound
#[async_trait]
pub trait Datastore: Send + Sync {
    /// One-time initialization.
    async fn open(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Release resources held by the store and its children.
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Store `value` under `key`.
    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()>;

    /// Read the value stored under `key`.
    async fn get(&self, key: &Key) -> StoreResult<Bytes>;

    /// Check whether a value is stored under `key`.
    async fn has(&self, key: &Key) -> StoreResult<bool>;

    /// Remove the value stored under `key`, if any.
    async fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Start accumulating writes to apply together.
    fn batch(&self) -> Box<dyn Batch>;

    /// Stream the pairs matching `query`.
    fn query(&self, query: Query) -> BoxStream<'_, Pair>;

    /// Stream the keys matching `query`.
    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key>;

    /// Store every pair pulled from `source`, yielding each one once written.
    ///
    /// The default implementation writes one pair per pull.
    fn put_many<'a>(&'a self, source: BoxStream<'a, Pair>) -> BoxStream<'a, Pair> {
        Box::new(PutMany {
            store: self,
            source,
        })
    }

    /// Read the value of every key pulled from `source`.
    fn get_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Bytes> {
        Box::new(GetMany {
            store: self,
            source,
        })
    }

    /// Delete every key pulled from `source`, yielding each one once removed.
    fn delete_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Key> {
        Box::new(DeleteMany {
            store: self,
            source,
        })
    }

    /// Optional access that bypasses any key rewriting this store performs.
    ///
    /// Returns `None` for stores that do not rewrite keys.
    fn raw_access(&self) -> Option<&dyn RawAccess> {
        None
    }
}

/// Writes accumulated for a single commit.
///
/// A batch only touches its store on [`Batch::commit`]. Atomicity holds at
/// most per underlying store; composites never coordinate commits across
/// their children.
#[async_trait]
pub trait Batch: Send {
    fn put(&mut self, key: Key, value: Bytes) -> StoreResult<()>;

    fn delete(&mut self, key: Key) -> StoreResult<()>;

    /// Apply every accumulated operation, in order.
    async fn commit(&mut self) -> StoreResult<()>;
}

/// Access to a store's underlying key space, skipping key transformation.
#[async_trait]
pub trait RawAccess: Send + Sync {
    async fn put_raw(&self, key: &Key, value: Bytes) -> StoreResult<()>;

    async fn get_raw(&self, key: &Key) -> StoreResult<Bytes>;

    async fn has_raw(&self, key: &Key) -> StoreResult<bool>;
}

struct PutMany<'a, S: ?Sized> {
    store: &'a S,
    source: BoxStream<'a, Pair>,
}

#[async_trait]
impl<'a, S: Datastore + ?Sized> DataStream<Pair> for PutMany<'a, S> {
    async fn next(&mut self) -> StoreResult<Option<Pair>> {
        let Some(pair) = self.source.next().await? else {
            return Ok(None);
        };
        self.store.put(&pair.key, pair.value.clone()).await?;
        Ok(Some(pair))
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.source.close().await
    }
}

struct GetMany<'a, S: ?Sized> {
    store: &'a S,
    source: BoxStream<'a, Key>,
}

#[async_trait]
impl<'a, S: Datastore + ?Sized> DataStream<Bytes> for GetMany<'a, S> {
    async fn next(&mut self) -> StoreResult<Option<Bytes>> {
        match self.source.next().await? {
            Some(key) => self.store.get(&key).await.map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.source.close().await
    }
}

struct DeleteMany<'a, S: ?Sized> {
    store: &'a S,
    source: BoxStream<'a, Key>,
}

#[async_trait]
impl<'a, S: Datastore + ?Sized> DataStream<Key> for DeleteMany<'a, S> {
    async fn next(&mut self) -> StoreResult<Option<Key>> {
        let Some(key) = self.source.next().await? else {
            return Ok(None);
        };
        self.store.delete(&key).await?;
        Ok(Some(key))
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.source.close().await
    }
}
