//! Misbehaving stores for exercising error and backpressure paths.

use async_trait::async_trait;
use bytes::Bytes;
use dsx_store::stream::{self, BoxStream};
use dsx_store::{Batch, Datastore, KeyQuery, MemoryDatastore, Query, StoreError, StoreResult};
use dsx_types::{Key, Pair};
use tokio::sync::Semaphore;

/// Route log output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn failure() -> StoreError {
    StoreError::Backend("failing store".into())
}

/// A store whose every operation fails. Batches accept writes but never
/// commit.
#[derive(Debug, Default)]
pub struct FailingDatastore;

impl FailingDatastore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Datastore for FailingDatastore {
    async fn open(&self) -> StoreResult<()> {
        Err(failure())
    }

    async fn close(&self) -> StoreResult<()> {
        Err(failure())
    }

    async fn put(&self, _key: &Key, _value: Bytes) -> StoreResult<()> {
        Err(failure())
    }

    async fn get(&self, _key: &Key) -> StoreResult<Bytes> {
        Err(failure())
    }

    async fn has(&self, _key: &Key) -> StoreResult<bool> {
        Err(failure())
    }

    async fn delete(&self, _key: &Key) -> StoreResult<()> {
        Err(failure())
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(FailingBatch)
    }

    fn query(&self, _query: Query) -> BoxStream<'_, Pair> {
        stream::failed(failure())
    }

    fn query_keys(&self, _query: KeyQuery) -> BoxStream<'_, Key> {
        stream::failed(failure())
    }
}

struct FailingBatch;

#[async_trait]
impl Batch for FailingBatch {
    fn put(&mut self, _key: Key, _value: Bytes) -> StoreResult<()> {
        Ok(())
    }

    fn delete(&mut self, _key: Key) -> StoreResult<()> {
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        Err(failure())
    }
}

/// A memory store whose writes wait for a gate to open.
#[derive(Debug)]
pub struct GatedDatastore {
    inner: MemoryDatastore,
    gate: Semaphore,
}

impl GatedDatastore {
    /// A store with its gate closed.
    pub fn new() -> Self {
        Self {
            inner: MemoryDatastore::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Open the gate for good.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn inner(&self) -> &MemoryDatastore {
        &self.inner
    }

    async fn pass(&self) -> StoreResult<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| StoreError::Aborted(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Datastore for GatedDatastore {
    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        self.pass().await?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        self.inner.get(key).await
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        self.inner.has(key).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.pass().await?;
        self.inner.delete(key).await
    }

    fn batch(&self) -> Box<dyn Batch> {
        self.inner.batch()
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        self.inner.query(query)
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        self.inner.query_keys(query)
    }
}
