//! Query descriptions and the base refinement pipeline.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use dsx_types::{Key, Pair};

use crate::error::StoreResult;
use crate::stream::{self, BoxStream};
use crate::traits::Datastore;

/// Something a query can yield: a full [`Pair`] or a bare [`Key`].
pub trait QueryItem: Clone + Send + Sync + 'static {
    /// The key of this item.
    fn key(&self) -> &Key;

    /// Replace the key, keeping everything else.
    fn with_key(self, key: Key) -> Self;

    /// Run `query` against `store` through the query method yielding `Self`.
    fn run_query(store: &dyn Datastore, query: Query<Self>) -> BoxStream<'_, Self>;
}

impl QueryItem for Pair {
    fn key(&self) -> &Key {
        &self.key
    }

    fn with_key(self, key: Key) -> Self {
        Pair { key, ..self }
    }

    fn run_query(store: &dyn Datastore, query: Query<Self>) -> BoxStream<'_, Self> {
        store.query(query)
    }
}

impl QueryItem for Key {
    fn key(&self) -> &Key {
        self
    }

    fn with_key(self, key: Key) -> Self {
        key
    }

    fn run_query(store: &dyn Datastore, query: Query<Self>) -> BoxStream<'_, Self> {
        store.query_keys(query)
    }
}

type FilterFn<T> = dyn Fn(&T) -> StoreResult<bool> + Send + Sync;
type OrderFn<T> = dyn Fn(&T, &T) -> StoreResult<Ordering> + Send + Sync;

/// A shareable query predicate.
pub struct Filter<T>(Arc<FilterFn<T>>);

impl<T> Filter<T> {
    /// A predicate that cannot fail.
    pub fn new(f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |item: &T| Ok(f(item))))
    }

    /// A predicate whose failure aborts the query.
    pub fn try_new(f: impl Fn(&T) -> StoreResult<bool> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn matches(&self, item: &T) -> StoreResult<bool> {
        (self.0)(item)
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

/// A shareable query comparator.
pub struct Order<T>(Arc<OrderFn<T>>);

impl<T> Order<T> {
    pub fn new(f: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |a: &T, b: &T| Ok(f(a, b))))
    }

    pub fn try_new(f: impl Fn(&T, &T) -> StoreResult<Ordering> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn compare(&self, a: &T, b: &T) -> StoreResult<Ordering> {
        (self.0)(a, b)
    }
}

impl<T: QueryItem> Order<T> {
    /// Ascending key order.
    pub fn key_ascending() -> Self {
        Self::new(|a: &T, b: &T| a.key().cmp(b.key()))
    }

    /// Descending key order.
    pub fn key_descending() -> Self {
        Self::new(|a: &T, b: &T| b.key().cmp(a.key()))
    }
}

impl<T> Clone for Order<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Order<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Order(..)")
    }
}

/// A query over a datastore.
///
/// `prefix` matches the start of the key's string form. Filters run in
/// order, then every order fully re-sorts the results (the last one
/// dominates, earlier ones break ties), then `offset` and `limit` apply.
#[derive(Clone, Debug)]
pub struct Query<T = Pair> {
    pub prefix: Option<String>,
    pub filters: Vec<Filter<T>>,
    pub orders: Vec<Order<T>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    /// Pair queries only: yield keys with empty values.
    pub keys_only: bool,
}

/// A keys-only query whose filters and orders see bare keys.
pub type KeyQuery = Query<Key>;

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            prefix: None,
            filters: Vec::new(),
            orders: Vec::new(),
            offset: None,
            limit: None,
            keys_only: false,
        }
    }
}

impl<T> Query<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter<T>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order(mut self, order: Order<T>) -> Self {
        self.orders.push(order);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// Apply a query's prefix, filters, orders, offset and limit to a stream.
///
/// Stores that can only enumerate their contents use this to answer
/// queries; composites use it to refine merged results.
pub fn refine<'a, T: QueryItem>(source: BoxStream<'a, T>, query: &Query<T>) -> BoxStream<'a, T> {
    let mut it = source;
    if let Some(prefix) = query.prefix.clone() {
        it = stream::filter(it, move |item: &T| {
            Ok(item.key().as_str().starts_with(prefix.as_str()))
        });
    }
    for f in &query.filters {
        let f = f.clone();
        it = stream::filter(it, move |item: &T| f.matches(item));
    }
    for o in &query.orders {
        let o = o.clone();
        it = stream::sort_all(it, move |a: &T, b: &T| o.compare(a, b));
    }
    if let Some(offset) = query.offset {
        it = stream::skip(it, offset);
    }
    if let Some(limit) = query.limit {
        it = stream::take(it, limit);
    }
    it
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, iter};

    fn keys(names: &[&str]) -> Vec<Key> {
        names.iter().map(Key::new).collect()
    }

    #[tokio::test]
    async fn refine_applies_prefix() {
        let q = KeyQuery::new().with_prefix("/a");
        let out = collect(refine(iter(keys(&["/a/1", "/b/1", "/ab"])), &q)).await.unwrap();
        assert_eq!(out, keys(&["/a/1", "/ab"]));
    }

    #[tokio::test]
    async fn refine_orders_then_pages() {
        let q = KeyQuery::new()
            .with_order(Order::key_descending())
            .with_offset(1)
            .with_limit(2);
        let out = collect(refine(iter(keys(&["/1", "/2", "/3", "/4"])), &q)).await.unwrap();
        assert_eq!(out, keys(&["/3", "/2"]));
    }

    #[tokio::test]
    async fn refine_chains_filters() {
        let q = KeyQuery::new()
            .with_filter(Filter::new(|k: &Key| k.name() != "2"))
            .with_filter(Filter::new(|k: &Key| k.name() != "3"));
        let out = collect(refine(iter(keys(&["/1", "/2", "/3"])), &q)).await.unwrap();
        assert_eq!(out, keys(&["/1"]));
    }

    #[tokio::test]
    async fn later_order_dominates() {
        let by_len = Order::new(|a: &Pair, b: &Pair| a.value.len().cmp(&b.value.len()));
        let q = Query::new()
            .with_order(Order::key_ascending())
            .with_order(by_len);
        let pairs = vec![
            Pair::new(Key::new("/b"), "x"),
            Pair::new(Key::new("/a"), "xx"),
            Pair::new(Key::new("/c"), "x"),
        ];
        let out = collect(refine(iter(pairs), &q)).await.unwrap();
        let names: Vec<_> = out.iter().map(|p| p.key.as_str().to_string()).collect();
        assert_eq!(names, vec!["/b", "/c", "/a"]);
    }

    #[test]
    fn with_key_swaps_only_key() {
        let pair = Pair::new(Key::new("/a"), "v").with_key(Key::new("/b"));
        assert_eq!(pair.key, Key::new("/b"));
        assert_eq!(pair.value, "v");
    }
}
