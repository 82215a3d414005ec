//! Key rewriting around a single child store.
//!
//! [`KeyTransformDatastore`] converts every key on the way into its child
//! and inverts every key the child hands back, so callers only ever see the
//! external key space. Queries are translated so that they behave as if
//! they had been run directly against that external space.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dsx_store::stream::{self, BoxStream};
use dsx_store::{
    Batch, Datastore, Filter, KeyQuery, Order, Query, QueryItem, RawAccess, SharedDatastore,
    StoreResult,
};
use dsx_types::{Key, Pair};

/// A pair of mutually inverse key functions.
///
/// `convert` maps external keys to the child's keys and `invert` maps them
/// back. For every key an adapter sees, `invert(convert(k)) == k` must hold;
/// a transform that breaks this is a programming error.
pub trait KeyTransform: Send + Sync + 'static {
    /// External key to child key.
    fn convert(&self, key: &Key) -> StoreResult<Key>;

    /// Child key to external key.
    fn invert(&self, key: &Key) -> StoreResult<Key>;

    /// Child-side prefix that scopes a query to this transform's image.
    ///
    /// Transforms that preserve key prefixes return the converted form of
    /// the external `prefix` so the child can narrow its scan. The external
    /// prefix is re-checked on inverted keys either way, so returning
    /// `None` (the default) is always correct.
    fn child_prefix(&self, _prefix: Option<&str>) -> Option<String> {
        None
    }

    /// Whether a child key lies in this transform's image.
    ///
    /// Keys outside it are dropped before anything tries to invert them.
    fn contains(&self, _key: &Key) -> bool {
        true
    }
}

/// A [`KeyTransform`] built from two closures.
pub struct FnTransform<C, I> {
    convert: C,
    invert: I,
}

impl<C, I> FnTransform<C, I>
where
    C: Fn(&Key) -> Key + Send + Sync + 'static,
    I: Fn(&Key) -> Key + Send + Sync + 'static,
{
    pub fn new(convert: C, invert: I) -> Self {
        Self { convert, invert }
    }
}

impl<C, I> KeyTransform for FnTransform<C, I>
where
    C: Fn(&Key) -> Key + Send + Sync + 'static,
    I: Fn(&Key) -> Key + Send + Sync + 'static,
{
    fn convert(&self, key: &Key) -> StoreResult<Key> {
        Ok((self.convert)(key))
    }

    fn invert(&self, key: &Key) -> StoreResult<Key> {
        Ok((self.invert)(key))
    }
}

/// A datastore that rewrites keys before handing them to its child.
pub struct KeyTransformDatastore<T> {
    child: SharedDatastore,
    transform: Arc<T>,
}

impl<T: KeyTransform> KeyTransformDatastore<T> {
    pub fn new(child: SharedDatastore, transform: T) -> Self {
        Self {
            child,
            transform: Arc::new(transform),
        }
    }

    /// The wrapped store.
    pub fn child(&self) -> &SharedDatastore {
        &self.child
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Rewrite an external query into one the child can run.
    ///
    /// Filters and orders are wrapped so they still observe external keys.
    /// The external prefix becomes a filter on inverted keys, because
    /// `convert` need not preserve prefixes. When the transform pushes a
    /// prefix down, child keys outside its image are dropped first.
    fn translate<I: QueryItem>(&self, query: Query<I>) -> Query<I> {
        let Query {
            prefix,
            filters,
            orders,
            offset,
            limit,
            keys_only,
        } = query;

        let child_prefix = self.transform.child_prefix(prefix.as_deref());
        let mut out = Query {
            filters: Vec::with_capacity(filters.len() + 2),
            orders: Vec::with_capacity(orders.len()),
            offset,
            limit,
            keys_only,
            prefix: None,
        };

        if let Some(child_prefix) = child_prefix {
            let t = Arc::clone(&self.transform);
            out.filters
                .push(Filter::new(move |item: &I| t.contains(item.key())));
            out.prefix = Some(child_prefix);
        }

        if let Some(prefix) = prefix {
            let t = Arc::clone(&self.transform);
            out.filters.push(Filter::try_new(move |item: &I| {
                Ok(t.invert(item.key())?.as_str().starts_with(prefix.as_str()))
            }));
        }

        for f in filters {
            let t = Arc::clone(&self.transform);
            out.filters.push(Filter::try_new(move |item: &I| {
                f.matches(&external(t.as_ref(), item)?)
            }));
        }

        for o in orders {
            let t = Arc::clone(&self.transform);
            out.orders.push(Order::try_new(move |a: &I, b: &I| {
                o.compare(&external(t.as_ref(), a)?, &external(t.as_ref(), b)?)
            }));
        }

        out
    }

    fn run<I: QueryItem>(&self, query: Query<I>) -> BoxStream<'_, I> {
        let inner = I::run_query(self.child.as_ref(), self.translate(query));
        invert_stream(Arc::clone(&self.transform), inner)
    }

    fn convert_stream<'a, I: QueryItem>(&self, source: BoxStream<'a, I>) -> BoxStream<'a, I> {
        let t = Arc::clone(&self.transform);
        stream::map(source, move |item: I| {
            let key = t.convert(item.key())?;
            Ok(item.with_key(key))
        })
    }
}

fn external<T: KeyTransform, I: QueryItem>(transform: &T, item: &I) -> StoreResult<I> {
    let key = transform.invert(item.key())?;
    Ok(item.clone().with_key(key))
}

fn invert_stream<'a, T: KeyTransform, I: QueryItem>(
    transform: Arc<T>,
    source: BoxStream<'a, I>,
) -> BoxStream<'a, I> {
    stream::map(source, move |item: I| {
        let key = transform.invert(item.key())?;
        Ok(item.with_key(key))
    })
}

#[async_trait]
impl<T: KeyTransform> Datastore for KeyTransformDatastore<T> {
    async fn open(&self) -> StoreResult<()> {
        self.child.open().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.child.close().await
    }

    async fn put(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        let key = self.transform.convert(key)?;
        self.child.put(&key, value).await
    }

    async fn get(&self, key: &Key) -> StoreResult<Bytes> {
        let key = self.transform.convert(key)?;
        self.child.get(&key).await
    }

    async fn has(&self, key: &Key) -> StoreResult<bool> {
        let key = self.transform.convert(key)?;
        self.child.has(&key).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        let key = self.transform.convert(key)?;
        self.child.delete(&key).await
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(TransformBatch {
            inner: self.child.batch(),
            transform: Arc::clone(&self.transform),
        })
    }

    fn query(&self, query: Query) -> BoxStream<'_, Pair> {
        self.run(query)
    }

    fn query_keys(&self, query: KeyQuery) -> BoxStream<'_, Key> {
        self.run(query)
    }

    fn put_many<'a>(&'a self, source: BoxStream<'a, Pair>) -> BoxStream<'a, Pair> {
        let written = self.child.put_many(self.convert_stream(source));
        invert_stream(Arc::clone(&self.transform), written)
    }

    fn get_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Bytes> {
        self.child.get_many(self.convert_stream(source))
    }

    fn delete_many<'a>(&'a self, source: BoxStream<'a, Key>) -> BoxStream<'a, Key> {
        let deleted = self.child.delete_many(self.convert_stream(source));
        invert_stream(Arc::clone(&self.transform), deleted)
    }

    fn raw_access(&self) -> Option<&dyn RawAccess> {
        Some(self)
    }
}

/// The child's key space, untouched by the transform.
#[async_trait]
impl<T: KeyTransform> RawAccess for KeyTransformDatastore<T> {
    async fn put_raw(&self, key: &Key, value: Bytes) -> StoreResult<()> {
        self.child.put(key, value).await
    }

    async fn get_raw(&self, key: &Key) -> StoreResult<Bytes> {
        self.child.get(key).await
    }

    async fn has_raw(&self, key: &Key) -> StoreResult<bool> {
        self.child.has(key).await
    }
}

struct TransformBatch<T> {
    inner: Box<dyn Batch>,
    transform: Arc<T>,
}

#[async_trait]
impl<T: KeyTransform> Batch for TransformBatch<T> {
    fn put(&mut self, key: Key, value: Bytes) -> StoreResult<()> {
        let key = self.transform.convert(&key)?;
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: Key) -> StoreResult<()> {
        let key = self.transform.convert(&key)?;
        self.inner.delete(key)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.inner.commit().await
    }
}
