//! Sharded key layout over a single child store.
//!
//! Every key is stored under a one-segment parent computed by a [`Shard`]
//! function, so `/CIQFOO` under `next-to-last/2` lands at `/FO/CIQFOO`. The
//! shard in use is persisted in the child under [`SHARDING_KEY`], next to a
//! human readable [`README_KEY`]; both sentinels bypass the transform and
//! never show up in query results.

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use dsx_store::stream::BoxStream;
use dsx_store::{
    Batch, Datastore, ErrorKind, Filter, KeyQuery, Query, QueryItem, RawAccess, SharedDatastore,
    StoreError, StoreResult,
};
use dsx_types::key::SEPARATOR;
use dsx_types::{Key, Pair};
use tracing::{debug, info};

use crate::keytransform::{KeyTransform, KeyTransformDatastore};
use crate::shard::{Shard, README};

/// Sentinel holding the shard descriptor followed by a newline.
pub const SHARDING_KEY: &str = "/SHARDING";

/// Sentinel holding [`README`].
pub const README_KEY: &str = "/_README";

/// Whether `key` is one of the two reserved sentinel keys.
pub fn is_sentinel(key: &Key) -> bool {
    key.as_str() == SHARDING_KEY || key.as_str() == README_KEY
}

async fn raw_put(store: &dyn Datastore, key: &Key, value: Bytes) -> StoreResult<()> {
    match store.raw_access() {
        Some(raw) => raw.put_raw(key, value).await,
        None => store.put(key, value).await,
    }
}

async fn raw_get(store: &dyn Datastore, key: &Key) -> StoreResult<Bytes> {
    match store.raw_access() {
        Some(raw) => raw.get_raw(key).await,
        None => store.get(key).await,
    }
}

async fn raw_has(store: &dyn Datastore, key: &Key) -> StoreResult<bool> {
    match store.raw_access() {
        Some(raw) => raw.has_raw(key).await,
        None => store.has(key).await,
    }
}

/// Read and parse the shard persisted in `store`.
///
/// Fails with [`StoreError::NotFound`] if the store was never sharded.
pub async fn read_shard(store: &dyn Datastore) -> StoreResult<Shard> {
    let bytes = raw_get(store, &Key::new(SHARDING_KEY)).await?;
    let text = String::from_utf8_lossy(&bytes);
    Shard::parse(&text)
}

/// Persist `shard` in `store`, or check it against the one already there.
///
/// A fresh store gets both sentinels written and `shard` back. A store that
/// already carries a descriptor returns the persisted shard, provided it
/// matches `shard` when one is given; a mismatch fails with
/// [`StoreError::ConfigConflict`] and leaves the store untouched.
pub async fn create(store: &dyn Datastore, shard: Option<&Shard>) -> StoreResult<Shard> {
    let sharding_key = Key::new(SHARDING_KEY);
    if !raw_has(store, &sharding_key).await? {
        let Some(shard) = shard else {
            return Err(StoreError::NotFound(format!(
                "{SHARDING_KEY} (no shard given and none persisted)"
            )));
        };
        let descriptor = Bytes::from(format!("{shard}\n"));
        let readme_key = Key::new(README_KEY);
        tokio::try_join!(
            raw_put(store, &sharding_key, descriptor),
            raw_put(store, &readme_key, Bytes::from_static(README.as_bytes())),
        )?;
        info!(%shard, "created sharded store");
        return Ok(*shard);
    }

    let existing = read_shard(store).await?;
    match shard {
        Some(requested) if requested.to_string() != existing.to_string() => {
            Err(StoreError::ConfigConflict {
                requested: requested.to_string(),
                existing: existing.to_string(),
            })
        }
        _ => {
            debug!(shard = %existing, "found existing shard");
            Ok(existing)
        }
    }
}

/// Prefixes keys with their shard label.
///
/// The shard is only known once the owning store has been opened; until
/// then, converting any non-sentinel key fails.
#[derive(Debug, Default)]
pub struct ShardTransform {
    shard: OnceLock<Shard>,
}

impl ShardTransform {
    /// A transform whose shard is already fixed.
    pub fn new(shard: Shard) -> Self {
        Self {
            shard: OnceLock::from(shard),
        }
    }

    pub fn shard(&self) -> Option<Shard> {
        self.shard.get().copied()
    }

    fn activate(&self, shard: Shard) -> StoreResult<()> {
        let active = self.shard.get_or_init(|| shard);
        if *active != shard {
            return Err(StoreError::ConfigConflict {
                requested: shard.to_string(),
                existing: active.to_string(),
            });
        }
        Ok(())
    }

    /// The one-segment parent `key` is stored under.
    fn label(shard: &Shard, key: &Key) -> Key {
        let noslash = key.as_str().trim_start_matches(SEPARATOR);
        let label = shard.fun(noslash).replace(SEPARATOR, "_");
        if label.is_empty() {
            Key::new("_")
        } else {
            Key::new(label)
        }
    }
}

impl KeyTransform for ShardTransform {
    fn convert(&self, key: &Key) -> StoreResult<Key> {
        if is_sentinel(key) {
            return Ok(key.clone());
        }
        let shard = self
            .shard
            .get()
            .ok_or_else(|| StoreError::open_failed("sharded store used before open"))?;
        Ok(Self::label(shard, key).child(key))
    }

    fn invert(&self, key: &Key) -> StoreResult<Key> {
        if is_sentinel(key) {
            return Ok(key.clone());
        }
        let namespaces = key.list();
        match namespaces.split_first() {
            Some((_, rest)) => Ok(Key::from_namespaces(rest)),
            None => Err(StoreError::InvariantViolation {
                prefix: "<shard label>".into(),
                key: key.to_string(),
            }),
        }
    }
}

/// A datastore that spreads its keys across shard directories of a child.
pub struct ShardingDatastore {
    inner: KeyTransformDatastore<ShardTransform>,
    requested: Option<Shard>,
}

impl ShardingDatastore {
    /// Wrap `child`. Nothing touches the child until [`Datastore::open`].
    ///
    /// With `shard` set, opening bootstraps a fresh child or checks it
    /// against the persisted shard. Without it, the persisted shard is
    /// adopted and opening an unsharded child fails.
    pub fn new(child: SharedDatastore, shard: Option<Shard>) -> Self {
        Self {
            inner: KeyTransformDatastore::new(child, ShardTransform::default()),
            requested: shard,
        }
    }

    /// Open a child that already carries a shard descriptor.
    pub async fn open_existing(child: SharedDatastore) -> StoreResult<Self> {
        let store = Self::new(child, None);
        store.open().await?;
        Ok(store)
    }

    /// Open `child`, sharding it with `shard` if it is not sharded yet.
    pub async fn create_or_open(child: SharedDatastore, shard: Shard) -> StoreResult<Self> {
        let store = Self::new(child, Some(shard));
        store.open().await?;
        Ok(store)
    }

    /// The shard in effect, once opened.
    pub fn shard(&self) -> Option<Shard> {
        self.inner.transform().shard()
    }

    pub fn child(&self) -> &SharedDatastore {
        self.inner.child()
    }
}

fn without_sentinels<I: QueryItem>(mut query: Query<I>) -> Query<I> {
    query
        .filters
        .insert(0, Filter::new(|item: &I| !is_sentinel(item.key())));
    query
}

fn open_error(err: StoreError) -> StoreError {
    match err.kind() {
        ErrorKind::ConfigConflict | ErrorKind::OpenFailed => err,
        _ => err.into_open_failed(),
    }
}

#[async_trait]
impl Datastore for ShardingDatastore {
    async fn open(&self) -> StoreResult<()> {
        self.inner.open().await.map_err(open_error)?;
        let shard = create(&self.inner, self.requested.as_ref())
            .await
            .map_err(open_error)?;
        self.inner.transform().activate(shard)
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }

    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        self.inner.get(key).await
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        self.inner.has(key).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    fn batch(&self) -> Box<dyn Batch> {
        self.inner.batch()
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        self.inner.query(without_sentinels(query))
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        self.inner.query_keys(without_sentinels(query))
    }

    fn put_many<'a>(&'a self, source: BoxStream<'a, Pair>) -> BoxStream<'a, Pair> {
        self.inner.put_many(source)
    }

    fn get_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Bytes> {
        self.inner.get_many(source)
    }

    fn delete_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Key> {
        self.inner.delete_many(source)
    }

    fn raw_access(&self) -> Option<&dyn RawAccess> {
        self.inner.raw_access()
    }
}
