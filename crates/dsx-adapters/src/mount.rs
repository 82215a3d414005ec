//! Prefix routing across several child stores.
//!
//! A [`MountDatastore`] owns an ordered table of mounts. A key is routed to
//! the first mount whose prefix equals it or is one of its ancestors, and the
//! child sees the key with that prefix removed. Table order decides between
//! overlapping prefixes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dsx_store::stream::{self, BoxStream};
use dsx_store::{
    refine, Batch, Datastore, ErrorKind, KeyQuery, Query, QueryItem, SharedDatastore, StoreError,
    StoreResult,
};
use dsx_types::key::SEPARATOR;
use dsx_types::{Key, Pair};
use tokio::task::JoinSet;
use tracing::debug;

use crate::fanout;

const NO_MOUNT: &str = "no datastore mounted for this key";

/// A store bound to a key prefix.
#[derive(Clone)]
pub struct Mount {
    pub prefix: Key,
    pub datastore: SharedDatastore,
}

impl Mount {
    pub fn new(prefix: Key, datastore: SharedDatastore) -> Self {
        Self { prefix, datastore }
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount").field("prefix", &self.prefix).finish()
    }
}

/// Index of the first mount covering `key`, and the key as that mount sees it.
fn lookup(mounts: &[Mount], key: &Key) -> Option<(usize, Key)> {
    mounts
        .iter()
        .enumerate()
        .find_map(|(idx, mount)| key.strip_ancestor(&mount.prefix).map(|rest| (idx, rest)))
}

/// Child-side prefix for `query_prefix` under a mount at `mount_prefix`.
///
/// `None` means no key of the mount can match. `Some(None)` means the whole
/// mount is in scope.
fn scoped_prefix(mount_prefix: &Key, query_prefix: Option<&str>) -> Option<Option<String>> {
    let Some(p) = query_prefix else {
        return Some(None);
    };
    if mount_prefix.is_root() {
        return Some(Some(p.to_string()));
    }
    let m = mount_prefix.as_str();
    if let Some(rest) = p.strip_prefix(m) {
        return match rest {
            "" => Some(None),
            r if r.starts_with(SEPARATOR) => Some(Some(r.to_string())),
            _ => None,
        };
    }
    if m.starts_with(p) {
        return Some(None);
    }
    None
}

/// A datastore that routes keys to child stores by prefix.
#[derive(Debug)]
pub struct MountDatastore {
    mounts: Arc<[Mount]>,
}

impl MountDatastore {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self {
            mounts: mounts.into(),
        }
    }

    /// The mount table, in routing order.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    fn stores(&self) -> Vec<SharedDatastore> {
        self.mounts.iter().map(|m| Arc::clone(&m.datastore)).collect()
    }

    fn route(&self, key: &Key) -> Option<(&Mount, Key)> {
        let (idx, rest) = lookup(&self.mounts, key)?;
        Some((&self.mounts[idx], rest))
    }

    /// Run `query` against every mount it can reach, then refine the
    /// merged results globally.
    fn run<I: QueryItem>(&self, query: Query<I>) -> BoxStream<'_, I> {
        let mut sources = Vec::with_capacity(self.mounts.len());
        for mount in self.mounts.iter() {
            let Some(prefix) = scoped_prefix(&mount.prefix, query.prefix.as_deref()) else {
                continue;
            };
            let sub = Query {
                prefix,
                keys_only: query.keys_only,
                ..Query::default()
            };
            let mount_prefix = mount.prefix.clone();
            let results = stream::map(
                I::run_query(mount.datastore.as_ref(), sub),
                move |item: I| {
                    let key = mount_prefix.child(item.key());
                    Ok(item.with_key(key))
                },
            );
            sources.push(results);
        }
        refine(stream::merge(sources), &query)
    }
}

#[async_trait]
impl Datastore for MountDatastore {
    async fn open(&self) -> StoreResult<()> {
        fanout::for_each(&self.stores(), |store| async move { store.open().await })
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::OpenFailed => err,
                _ => err.into_open_failed(),
            })
    }

    async fn close(&self) -> StoreResult<()> {
        fanout::for_each(&self.stores(), |store| async move { store.close().await }).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        match self.route(key) {
            Some((mount, rest)) => mount.datastore.put(&rest, value).await,
            None => {
                debug!(%key, "put rejected, no mount");
                Err(StoreError::write_failed(NO_MOUNT))
            }
        }
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        match self.route(key) {
            Some((mount, rest)) => mount.datastore.get(&rest).await,
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        match self.route(key) {
            Some((mount, rest)) => mount.datastore.has(&rest).await,
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        match self.route(key) {
            Some((mount, rest)) => mount.datastore.delete(&rest).await,
            None => {
                debug!(%key, "delete rejected, no mount");
                Err(StoreError::delete_failed(NO_MOUNT))
            }
        }
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(MountBatch {
            mounts: Arc::clone(&self.mounts),
            batches: BTreeMap::new(),
        })
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        self.run(query)
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        self.run(query)
    }
}

/// One child batch per mount touched, created on first use.
struct MountBatch {
    mounts: Arc<[Mount]>,
    batches: BTreeMap<usize, Box<dyn Batch>>,
}

impl MountBatch {
    fn route(&mut self, key: &Key) -> Option<(&mut Box<dyn Batch>, Key)> {
        let (idx, rest) = lookup(&self.mounts, key)?;
        let mounts = &self.mounts;
        let batch = self
            .batches
            .entry(idx)
            .or_insert_with(|| mounts[idx].datastore.batch());
        Some((batch, rest))
    }
}

#[async_trait]
impl Batch for MountBatch {
    fn put(&mut self, key: Key, value: Bytes) -> StoreResult<()> {
        let (batch, rest) = self
            .route(&key)
            .ok_or_else(|| StoreError::write_failed(NO_MOUNT))?;
        batch.put(rest, value)
    }

    fn delete(&mut self, key: Key) -> StoreResult<()> {
        let (batch, rest) = self
            .route(&key)
            .ok_or_else(|| StoreError::delete_failed(NO_MOUNT))?;
        batch.delete(rest)
    }

    /// Commit every child batch concurrently. Each child commits
    /// atomically at most on its own; there is no cross-mount atomicity.
    async fn commit(&mut self) -> StoreResult<()> {
        let mut tasks = JoinSet::new();
        for (_, mut batch) in std::mem::take(&mut self.batches) {
            tasks.spawn(async move { batch.commit().await });
        }
        fanout::join_all(tasks).await
    }
}
