//! Priority-ordered replication across several stores.
//!
//! Writes go to every tier. Reads try tiers in order and return the first
//! hit, so tier 0 acts as the fastest cache. The last tier is authoritative
//! for queries.

use async_trait::async_trait;
use bytes::Bytes;
use dsx_store::stream::{self, BoxStream, DataStream};
use dsx_store::{
    Batch, Datastore, ErrorKind, KeyQuery, Query, SharedDatastore, StoreError, StoreResult,
};
use dsx_types::{Key, Pair};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::fanout::{self, flatten};

/// Tuning for [`TieredDatastore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredOptions {
    /// Items each tier may fall behind the caller during bulk writes.
    pub buffer: usize,
}

impl Default for TieredOptions {
    fn default() -> Self {
        Self { buffer: 16 }
    }
}

/// A datastore that writes through to every tier and reads from the first
/// tier holding a key.
pub struct TieredDatastore {
    tiers: Vec<SharedDatastore>,
    options: TieredOptions,
}

impl TieredDatastore {
    pub fn new(tiers: Vec<SharedDatastore>) -> Self {
        Self::with_options(tiers, TieredOptions::default())
    }

    pub fn with_options(tiers: Vec<SharedDatastore>, options: TieredOptions) -> Self {
        Self { tiers, options }
    }

    /// The tiers, highest read priority first.
    pub fn tiers(&self) -> &[SharedDatastore] {
        &self.tiers
    }

    pub fn options(&self) -> &TieredOptions {
        &self.options
    }
}

impl std::fmt::Debug for TieredDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredDatastore")
            .field("tiers", &self.tiers.len())
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl Datastore for TieredDatastore {
    async fn open(&self) -> StoreResult<()> {
        fanout::for_each(&self.tiers, |tier| async move { tier.open().await })
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::OpenFailed => err,
                _ => err.into_open_failed(),
            })
    }

    async fn close(&self) -> StoreResult<()> {
        fanout::for_each(&self.tiers, |tier| async move { tier.close().await }).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        let key = key.clone();
        fanout::for_each(&self.tiers, move |tier| {
            let key = key.clone();
            let value = value.clone();
            async move { tier.put(&key, value).await }
        })
        .await
        .map_err(StoreError::into_write_failed)
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        for (tier, store) in self.tiers.iter().enumerate() {
            match store.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_not_found() => {}
                Err(err) => warn!(tier, %key, error = %err, "tier get failed, trying next tier"),
            }
        }
        Err(StoreError::NotFound(key.to_string()))
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        for (tier, store) in self.tiers.iter().enumerate() {
            match store.has(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => warn!(tier, %key, error = %err, "tier has failed, trying next tier"),
            }
        }
        Ok(false)
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        let key = key.clone();
        fanout::for_each(&self.tiers, move |tier| {
            let key = key.clone();
            async move { tier.delete(&key).await }
        })
        .await
        .map_err(StoreError::into_delete_failed)
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(TieredBatch {
            batches: self.tiers.iter().map(|tier| tier.batch()).collect(),
        })
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        match self.tiers.last() {
            Some(tier) => tier.query(query),
            None => stream::empty(),
        }
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        match self.tiers.last() {
            Some(tier) => tier.query_keys(query),
            None => stream::empty(),
        }
    }

    fn put_many<'a>(&'a self, source: BoxStream<'a, Pair>) -> BoxStream<'a, Pair> {
        Box::new(FanOut::new(source, &self.tiers, self.options.buffer))
    }

    fn delete_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Key> {
        Box::new(FanOut::new(source, &self.tiers, self.options.buffer))
    }
}

struct TieredBatch {
    batches: Vec<Box<dyn Batch>>,
}

#[async_trait]
impl Batch for TieredBatch {
    fn put(&mut self, key: Key, value: Bytes) -> StoreResult<()> {
        for batch in &mut self.batches {
            batch.put(key.clone(), value.clone())?;
        }
        Ok(())
    }

    fn delete(&mut self, key: Key) -> StoreResult<()> {
        for batch in &mut self.batches {
            batch.delete(key.clone())?;
        }
        Ok(())
    }

    /// Commits tier by tier, stopping at the first failure.
    async fn commit(&mut self) -> StoreResult<()> {
        for batch in &mut self.batches {
            batch.commit().await?;
        }
        Ok(())
    }
}

/// Items a bulk operation can fan out to every tier.
trait FanOutItem: Clone + Send + Sync + 'static {
    /// The tier's bulk operation for this item type.
    fn sink<'s>(store: &'s dyn Datastore, source: BoxStream<'s, Self>) -> BoxStream<'s, Self>;

    /// Tag a tier failure with the operation's error kind.
    fn wrap(err: StoreError) -> StoreError;
}

impl FanOutItem for Pair {
    fn sink<'s>(store: &'s dyn Datastore, source: BoxStream<'s, Self>) -> BoxStream<'s, Self> {
        store.put_many(source)
    }

    fn wrap(err: StoreError) -> StoreError {
        err.into_write_failed()
    }
}

impl FanOutItem for Key {
    fn sink<'s>(store: &'s dyn Datastore, source: BoxStream<'s, Self>) -> BoxStream<'s, Self> {
        store.delete_many(source)
    }

    fn wrap(err: StoreError) -> StoreError {
        err.into_delete_failed()
    }
}

/// Re-emits its source while feeding every item to each tier.
///
/// Each tier drains its own bounded channel in a separate task, so a slow
/// tier only holds the caller back once its buffer is full. The first tier
/// failure cancels every other tier and ends the stream with that error.
/// Items already yielded are never cancelled: if the stream ends early,
/// through a source error or by being dropped, the tiers still drain what
/// they were sent.
struct FanOut<'a, T> {
    source: BoxStream<'a, T>,
    tiers: Vec<SharedDatastore>,
    buffer: usize,
    senders: Vec<mpsc::Sender<T>>,
    tasks: JoinSet<StoreResult<()>>,
    started: bool,
    done: bool,
}

impl<'a, T: FanOutItem> FanOut<'a, T> {
    fn new(source: BoxStream<'a, T>, tiers: &[SharedDatastore], buffer: usize) -> Self {
        Self {
            source,
            tiers: tiers.to_vec(),
            buffer: buffer.max(1),
            senders: Vec::with_capacity(tiers.len()),
            tasks: JoinSet::new(),
            started: false,
            done: false,
        }
    }

    fn start(&mut self) {
        self.started = true;
        for tier in self.tiers.drain(..) {
            let (tx, rx) = mpsc::channel(self.buffer);
            self.senders.push(tx);
            self.tasks.spawn(async move {
                let sink = T::sink(tier.as_ref(), stream::from_receiver(rx));
                stream::drain(sink).await
            });
        }
    }

    /// Cancel every tier and end the stream.
    fn abort(&mut self) {
        self.done = true;
        self.senders.clear();
        self.tasks.abort_all();
    }

    fn fail(&mut self, err: StoreError) -> StoreError {
        warn!(error = %err, "tier failed during bulk write, cancelling fan-out");
        self.abort();
        T::wrap(err)
    }

    /// Find out why a tier stopped taking items.
    async fn tier_failure(&mut self) -> StoreError {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = flatten(joined) {
                return self.fail(err);
            }
        }
        self.abort();
        T::wrap(StoreError::Aborted(
            "a tier stopped consuming before the input ended".into(),
        ))
    }

    async fn send_all(&mut self, item: &T) -> StoreResult<()> {
        for idx in 0..self.senders.len() {
            loop {
                tokio::select! {
                    sent = self.senders[idx].send(item.clone()) => {
                        if sent.is_err() {
                            return Err(self.tier_failure().await);
                        }
                        break;
                    }
                    Some(joined) = self.tasks.join_next() => {
                        if let Err(err) = flatten(joined) {
                            return Err(self.fail(err));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Signal end of input and wait for every tier to catch up.
    async fn finish(&mut self) -> StoreResult<()> {
        self.senders.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = flatten(joined) {
                return Err(self.fail(err));
            }
        }
        self.done = true;
        debug!("bulk write reached every tier");
        Ok(())
    }
}

impl<T> Drop for FanOut<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // Closing the channels ends each tier's input once it catches up.
        self.senders.clear();
        self.tasks.detach_all();
    }
}

#[async_trait]
impl<'a, T: FanOutItem> DataStream<T> for FanOut<'a, T> {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.start();
        }
        let item = match self.source.next().await {
            Ok(Some(item)) => item,
            Ok(None) => return self.finish().await.map(|()| None),
            Err(err) => {
                if let Err(tier) = self.finish().await {
                    debug!(error = %tier, "tier also failed after source error");
                }
                return Err(err);
            }
        };
        self.send_all(&item).await?;
        Ok(Some(item))
    }

    async fn close(&mut self) -> StoreResult<()> {
        let closed = self.source.close().await;
        if !self.done {
            self.finish().await?;
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use dsx_store::stream::collect;
    use dsx_store::MemoryDatastore;

    use crate::testutil::{init_tracing, FailingDatastore, GatedDatastore};

    fn k(s: &str) -> Key {
        Key::new(s)
    }

    fn two_tiers() -> (Arc<MemoryDatastore>, Arc<MemoryDatastore>, TieredDatastore) {
        let fast = Arc::new(MemoryDatastore::new());
        let slow = Arc::new(MemoryDatastore::new());
        let store = TieredDatastore::new(vec![fast.clone(), slow.clone()]);
        (fast, slow, store)
    }

    #[tokio::test]
    async fn put_writes_through() {
        let (fast, slow, store) = two_tiers();
        store.put(&k("/k"), Bytes::from("v")).await.unwrap();
        assert_eq!(fast.get(&k("/k")).await.unwrap(), "v");
        assert_eq!(slow.get(&k("/k")).await.unwrap(), "v");

        store.delete(&k("/k")).await.unwrap();
        assert!(fast.is_empty());
        assert!(slow.is_empty());
        store.delete(&k("/k")).await.unwrap();
    }

    #[tokio::test]
    async fn read_falls_back_to_lower_tier() {
        let (_fast, slow, store) = two_tiers();
        slow.put(&k("/only-slow"), Bytes::from("deep")).await.unwrap();
        assert_eq!(store.get(&k("/only-slow")).await.unwrap(), "deep");
        assert!(store.has(&k("/only-slow")).await.unwrap());

        assert!(store.get(&k("/nowhere")).await.unwrap_err().is_not_found());
        assert!(!store.has(&k("/nowhere")).await.unwrap());
    }

    #[tokio::test]
    async fn first_tier_wins() {
        let (fast, slow, store) = two_tiers();
        fast.put(&k("/k"), Bytes::from("cached")).await.unwrap();
        slow.put(&k("/k"), Bytes::from("stale")).await.unwrap();
        assert_eq!(store.get(&k("/k")).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn broken_tier_is_skipped_on_read() {
        init_tracing();
        let good = Arc::new(MemoryDatastore::new());
        good.put(&k("/k"), Bytes::from("v")).await.unwrap();
        let store = TieredDatastore::new(vec![Arc::new(FailingDatastore::new()), good]);
        assert_eq!(store.get(&k("/k")).await.unwrap(), "v");
        assert!(store.has(&k("/k")).await.unwrap());
    }

    #[tokio::test]
    async fn put_failure_is_write_failed() {
        let good = Arc::new(MemoryDatastore::new());
        let store = TieredDatastore::new(vec![good.clone(), Arc::new(FailingDatastore::new())]);

        let err = store.put(&k("/k"), Bytes::from("v")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        // No rollback of tiers that succeeded.
        assert!(good.has(&k("/k")).await.unwrap());

        let err = store.delete(&k("/k")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeleteFailed);
    }

    #[tokio::test]
    async fn query_uses_last_tier() {
        let (fast, slow, store) = two_tiers();
        fast.put(&k("/cache-only"), Bytes::from("x")).await.unwrap();
        slow.put(&k("/durable"), Bytes::from("y")).await.unwrap();

        let keys = collect(store.query_keys(KeyQuery::new())).await.unwrap();
        assert_eq!(keys, vec![k("/durable")]);
        let pairs = collect(store.query(Query::new())).await.unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[tokio::test]
    async fn no_tiers() {
        let store = TieredDatastore::new(Vec::new());
        assert!(collect(store.query(Query::new())).await.unwrap().is_empty());
        assert!(!store.has(&k("/k")).await.unwrap());
        store.put(&k("/k"), Bytes::from("v")).await.unwrap();
    }

    #[tokio::test]
    async fn batch_applies_to_every_tier() {
        let (fast, slow, store) = two_tiers();
        slow.put(&k("/gone"), Bytes::from("x")).await.unwrap();

        let mut batch = store.batch();
        batch.put(k("/a"), Bytes::from("1")).unwrap();
        batch.delete(k("/gone")).unwrap();
        batch.commit().await.unwrap();

        assert_eq!(fast.keys(), vec![k("/a")]);
        assert_eq!(slow.keys(), vec![k("/a")]);
    }

    #[tokio::test]
    async fn batch_commit_failure_surfaces() {
        let store = TieredDatastore::new(vec![
            Arc::new(MemoryDatastore::new()),
            Arc::new(FailingDatastore::new()),
        ]);
        let mut batch = store.batch();
        batch.put(k("/a"), Bytes::from("1")).unwrap();
        assert!(batch.commit().await.is_err());
    }

    #[tokio::test]
    async fn put_many_reaches_every_tier() {
        let (fast, slow, store) = two_tiers();
        let pairs: Vec<_> = (0..20)
            .map(|i| Pair::new(k(&format!("/{i:02}")), "v"))
            .collect();

        let written = collect(store.put_many(stream::iter(pairs))).await.unwrap();
        assert_eq!(written.len(), 20);
        assert_eq!(written[0].key, k("/00"));
        assert_eq!(fast.len(), 20);
        assert_eq!(slow.len(), 20);
    }

    #[tokio::test]
    async fn delete_many_reaches_every_tier() {
        let (fast, slow, store) = two_tiers();
        for key in ["/a", "/b", "/c"] {
            store.put(&k(key), Bytes::from("v")).await.unwrap();
        }
        let deleted = collect(store.delete_many(stream::iter(vec![k("/a"), k("/c")])))
            .await
            .unwrap();
        assert_eq!(deleted, vec![k("/a"), k("/c")]);
        assert_eq!(fast.keys(), vec![k("/b")]);
        assert_eq!(slow.keys(), vec![k("/b")]);
    }

    #[tokio::test]
    async fn put_many_failure_cancels_fan_out() {
        init_tracing();
        let good = Arc::new(MemoryDatastore::new());
        let store = TieredDatastore::new(vec![good.clone(), Arc::new(FailingDatastore::new())]);
        let pairs: Vec<_> = (0..5).map(|i| Pair::new(k(&format!("/{i}")), "v")).collect();

        let err = collect(store.put_many(stream::iter(pairs))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
    }

    #[tokio::test]
    async fn delete_many_failure_is_delete_failed() {
        let store = TieredDatastore::new(vec![
            Arc::new(MemoryDatastore::new()),
            Arc::new(FailingDatastore::new()),
        ]);
        let err = collect(store.delete_many(stream::iter(vec![k("/a")])))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeleteFailed);
    }

    #[tokio::test]
    async fn slow_tier_is_buffered_not_unbounded() {
        let fast = Arc::new(MemoryDatastore::new());
        let gated = Arc::new(GatedDatastore::new());
        let store = TieredDatastore::with_options(
            vec![fast.clone(), gated.clone()],
            TieredOptions { buffer: 2 },
        );

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::map(
            stream::iter((0..10).map(|i| Pair::new(k(&format!("/{i}")), "v"))),
            move |pair: Pair| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(pair)
            },
        );

        let consumer = collect(store.put_many(source));
        let observer = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let seen = pulled.load(Ordering::SeqCst);
            assert!(seen < 10, "caller ran ahead of a stalled tier: {seen}");
            assert!(fast.len() >= 1);
            assert_eq!(gated.inner().len(), 0);
            gated.release();
        };

        let (written, ()) = tokio::join!(consumer, observer);
        assert_eq!(written.unwrap().len(), 10);
        assert_eq!(fast.len(), 10);
        assert_eq!(gated.inner().len(), 10);
    }

    async fn wait_for_len(store: &MemoryDatastore, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len() < len {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("store stuck at {} of {len} items", store.len()));
    }

    #[tokio::test]
    async fn dropped_put_many_still_reaches_every_tier() {
        let (fast, slow, store) = two_tiers();
        let pairs: Vec<_> = (0..3).map(|i| Pair::new(k(&format!("/{i}")), "v")).collect();

        let written = collect(stream::take(store.put_many(stream::iter(pairs)), 3))
            .await
            .unwrap();
        assert_eq!(written.len(), 3);

        wait_for_len(&fast, 3).await;
        wait_for_len(&slow, 3).await;
    }

    #[tokio::test]
    async fn dropped_delete_many_still_reaches_every_tier() {
        let (fast, slow, store) = two_tiers();
        for key in ["/a", "/b", "/c", "/d"] {
            store.put(&k(key), Bytes::from("v")).await.unwrap();
        }
        let mut deletes = store.delete_many(stream::iter(vec![k("/a"), k("/b"), k("/c")]));
        assert_eq!(deletes.next().await.unwrap(), Some(k("/a")));
        assert_eq!(deletes.next().await.unwrap(), Some(k("/b")));
        drop(deletes);

        tokio::time::timeout(Duration::from_secs(5), async {
            while fast.len() > 2 || slow.len() > 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(!fast.has(&k("/a")).await.unwrap());
        assert!(!slow.has(&k("/b")).await.unwrap());
        assert!(slow.has(&k("/c")).await.unwrap());
    }

    #[tokio::test]
    async fn source_error_keeps_acknowledged_items() {
        let (fast, slow, store) = two_tiers();
        let source = stream::map(stream::iter(0..3), |i: i32| {
            if i == 2 {
                Err(StoreError::Backend("source broke".into()))
            } else {
                Ok(Pair::new(k(&format!("/{i}")), "v"))
            }
        });

        let err = collect(store.put_many(source)).await.unwrap_err();
        assert!(err.to_string().contains("source broke"));
        assert_eq!(fast.len(), 2);
        assert_eq!(slow.len(), 2);
    }

    #[tokio::test]
    async fn stopped_tier_is_write_failed() {
        let mut fan_out = FanOut::new(
            stream::iter(vec![Pair::new(k("/a"), "v")]),
            &[Arc::new(MemoryDatastore::new()) as SharedDatastore],
            1,
        );
        fan_out.start();
        fan_out.tasks.abort_all();
        while fan_out.tasks.join_next().await.is_some() {}
        let err = fan_out.tier_failure().await;
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
    }

    #[tokio::test]
    async fn open_failure_is_open_failed() {
        let store = TieredDatastore::new(vec![
            Arc::new(MemoryDatastore::new()),
            Arc::new(FailingDatastore::new()),
        ]);
        let err = store.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFailed);
        store.close().await.unwrap_err();
    }

    #[test]
    fn options_default_buffer() {
        assert_eq!(TieredOptions::default().buffer, 16);
    }
}
