//! Pull-based lazy streams and the combinators queries are built from.
//!
//! A [`DataStream`] yields items one at a time through an explicit
//! [`DataStream::next`] call and may be released early with
//! [`DataStream::close`]. Query pipelines are assembled by wrapping one
//! stream in another: [`filter`], [`take`], [`skip`], [`map`], [`merge`]
//! and [`sort_all`]. Only [`sort_all`] buffers; every other combinator pulls
//! exactly as many items from its source as it needs.

use std::cmp::Ordering;
use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};

/// A lazy, fallible sequence of items.
#[async_trait]
pub trait DataStream<T: Send>: Send {
    /// Pull the next item. `Ok(None)` marks the end of the stream.
    async fn next(&mut self) -> StoreResult<Option<T>>;

    /// Release the stream before it is exhausted.
    ///
    /// Combinators forward `close` to their sources.
    async fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// An owned, type-erased stream borrowing from `'a`.
pub type BoxStream<'a, T> = Box<dyn DataStream<T> + 'a>;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

struct IterStream<I> {
    iter: I,
}

#[async_trait]
impl<T, I> DataStream<T> for IterStream<I>
where
    T: Send,
    I: Iterator<Item = T> + Send,
{
    async fn next(&mut self) -> StoreResult<Option<T>> {
        Ok(self.iter.next())
    }
}

/// A stream over the items of an iterator.
pub fn iter<'a, T, I>(items: I) -> BoxStream<'a, T>
where
    T: Send + 'a,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'a,
{
    Box::new(IterStream {
        iter: items.into_iter(),
    })
}

/// A stream that yields nothing.
pub fn empty<'a, T: Send + 'a>() -> BoxStream<'a, T> {
    iter(Vec::new())
}

/// A stream that fails with `err` on the first pull.
pub fn failed<'a, T: Send + 'a>(err: StoreError) -> BoxStream<'a, T> {
    Box::new(FailedStream { err: Some(err) })
}

struct FailedStream {
    err: Option<StoreError>,
}

#[async_trait]
impl<T: Send> DataStream<T> for FailedStream {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

struct ReceiverStream<T> {
    rx: mpsc::Receiver<T>,
}

#[async_trait]
impl<T: Send> DataStream<T> for ReceiverStream<T> {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.rx.close();
        Ok(())
    }
}

/// A stream fed by a bounded channel. It ends when every sender is dropped.
pub fn from_receiver<'a, T: Send + 'a>(rx: mpsc::Receiver<T>) -> BoxStream<'a, T> {
    Box::new(ReceiverStream { rx })
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

struct Filter<'a, T, F> {
    inner: BoxStream<'a, T>,
    pred: F,
}

#[async_trait]
impl<'a, T, F> DataStream<T> for Filter<'a, T, F>
where
    T: Send + 'a,
    F: FnMut(&T) -> StoreResult<bool> + Send + 'a,
{
    async fn next(&mut self) -> StoreResult<Option<T>> {
        while let Some(item) = self.inner.next().await? {
            if (self.pred)(&item)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Yield only the items for which `pred` holds.
///
/// An error from `pred` is returned from `next` and ends the pipeline.
pub fn filter<'a, T, F>(inner: BoxStream<'a, T>, pred: F) -> BoxStream<'a, T>
where
    T: Send + 'a,
    F: FnMut(&T) -> StoreResult<bool> + Send + 'a,
{
    Box::new(Filter { inner, pred })
}

struct Take<'a, T> {
    inner: BoxStream<'a, T>,
    remaining: usize,
}

#[async_trait]
impl<'a, T: Send + 'a> DataStream<T> for Take<'a, T> {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let item = self.inner.next().await?;
        if item.is_some() {
            self.remaining -= 1;
        } else {
            self.remaining = 0;
        }
        Ok(item)
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Yield at most `n` items. With `n == 0` the source is never pulled.
pub fn take<'a, T: Send + 'a>(inner: BoxStream<'a, T>, n: usize) -> BoxStream<'a, T> {
    Box::new(Take {
        inner,
        remaining: n,
    })
}

struct Skip<'a, T> {
    inner: BoxStream<'a, T>,
    remaining: usize,
}

#[async_trait]
impl<'a, T: Send + 'a> DataStream<T> for Skip<'a, T> {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        while self.remaining > 0 {
            self.remaining -= 1;
            if self.inner.next().await?.is_none() {
                self.remaining = 0;
                return Ok(None);
            }
        }
        self.inner.next().await
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Drop the first `n` items.
pub fn skip<'a, T: Send + 'a>(inner: BoxStream<'a, T>, n: usize) -> BoxStream<'a, T> {
    Box::new(Skip {
        inner,
        remaining: n,
    })
}

struct Map<'a, T, F> {
    inner: BoxStream<'a, T>,
    f: F,
}

#[async_trait]
impl<'a, T, U, F> DataStream<U> for Map<'a, T, F>
where
    T: Send + 'a,
    U: Send,
    F: FnMut(T) -> StoreResult<U> + Send + 'a,
{
    async fn next(&mut self) -> StoreResult<Option<U>> {
        match self.inner.next().await? {
            Some(item) => (self.f)(item).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.inner.close().await
    }
}

/// Transform every item with `f`.
pub fn map<'a, T, U, F>(inner: BoxStream<'a, T>, f: F) -> BoxStream<'a, U>
where
    T: Send + 'a,
    U: Send + 'a,
    F: FnMut(T) -> StoreResult<U> + Send + 'a,
{
    Box::new(Map { inner, f })
}

struct Merge<'a, T> {
    active: VecDeque<BoxStream<'a, T>>,
}

#[async_trait]
impl<'a, T: Send + 'a> DataStream<T> for Merge<'a, T> {
    async fn next(&mut self) -> StoreResult<Option<T>> {
        while let Some(mut source) = self.active.pop_front() {
            match source.next().await {
                Ok(Some(item)) => {
                    self.active.push_back(source);
                    return Ok(Some(item));
                }
                Ok(None) => continue,
                Err(err) => {
                    self.active.push_front(source);
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> StoreResult<()> {
        let mut first_err = None;
        for mut source in self.active.drain(..) {
            if let Err(err) = source.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Interleave several streams round-robin.
///
/// Each pull takes one item from the next still-active source; a source is
/// dropped once exhausted and the merged stream ends when all of them are.
/// The result is not globally ordered.
pub fn merge<'a, T: Send + 'a>(sources: Vec<BoxStream<'a, T>>) -> BoxStream<'a, T> {
    Box::new(Merge {
        active: sources.into(),
    })
}

struct SortAll<'a, T, F> {
    inner: Option<BoxStream<'a, T>>,
    sorted: std::vec::IntoIter<T>,
    cmp: F,
}

#[async_trait]
impl<'a, T, F> DataStream<T> for SortAll<'a, T, F>
where
    T: Send + 'a,
    F: FnMut(&T, &T) -> StoreResult<Ordering> + Send + 'a,
{
    async fn next(&mut self) -> StoreResult<Option<T>> {
        if let Some(mut inner) = self.inner.take() {
            let mut items = Vec::new();
            while let Some(item) = inner.next().await? {
                items.push(item);
            }
            sort_by_fallible(&mut items, &mut self.cmp)?;
            self.sorted = items.into_iter();
        }
        Ok(self.sorted.next())
    }

    async fn close(&mut self) -> StoreResult<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

/// Materialize the whole stream, sort it with `cmp`, then yield in order.
///
/// The sort is stable. Any failure while collecting or comparing surfaces
/// on the first pull, before any item is yielded.
pub fn sort_all<'a, T, F>(inner: BoxStream<'a, T>, cmp: F) -> BoxStream<'a, T>
where
    T: Send + 'a,
    F: FnMut(&T, &T) -> StoreResult<Ordering> + Send + 'a,
{
    Box::new(SortAll {
        inner: Some(inner),
        sorted: Vec::new().into_iter(),
        cmp,
    })
}

fn sort_by_fallible<T, F>(items: &mut [T], cmp: &mut F) -> StoreResult<()>
where
    F: FnMut(&T, &T) -> StoreResult<Ordering>,
{
    let mut first_err = None;
    items.sort_by(|a, b| {
        if first_err.is_some() {
            return Ordering::Equal;
        }
        cmp(a, b).unwrap_or_else(|err| {
            first_err = Some(err);
            Ordering::Equal
        })
    });
    first_err.map_or(Ok(()), Err)
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Pull every item into a vector.
pub async fn collect<T: Send>(mut stream: BoxStream<'_, T>) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await? {
        out.push(item);
    }
    Ok(out)
}

/// Pull every item and discard it.
pub async fn drain<T: Send>(mut stream: BoxStream<'_, T>) -> StoreResult<()> {
    while stream.next().await?.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    /// Counts how many items were pulled from it.
    struct Counting {
        next: usize,
        len: usize,
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DataStream<usize> for Counting {
        async fn next(&mut self) -> StoreResult<Option<usize>> {
            self.pulls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.next == self.len {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next - 1))
        }
    }

    fn counting(len: usize) -> (BoxStream<'static, usize>, Arc<AtomicUsize>) {
        let pulls = Arc::new(AtomicUsize::new(0));
        let stream = Box::new(Counting {
            next: 0,
            len,
            pulls: pulls.clone(),
        });
        (stream, pulls)
    }

    #[tokio::test]
    async fn filter_keeps_matching() {
        let s = filter(iter(1..=10), |n: &i32| Ok(n % 3 == 0));
        assert_eq!(collect(s).await.unwrap(), vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn filter_error_propagates() {
        let s = filter(iter(1..=3), |n: &i32| {
            if *n == 2 {
                Err(StoreError::Backend("bad item".into()))
            } else {
                Ok(true)
            }
        });
        let err = collect(s).await.unwrap_err();
        assert!(err.to_string().contains("bad item"));
    }

    #[tokio::test]
    async fn take_zero_never_pulls() {
        let (source, pulls) = counting(5);
        let s = take(source, 0);
        assert!(collect(s).await.unwrap().is_empty());
        assert_eq!(pulls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn take_stops_pulling_at_limit() {
        let (source, pulls) = counting(100);
        let s = take(source, 3);
        assert_eq!(collect(s).await.unwrap(), vec![0, 1, 2]);
        assert_eq!(pulls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn take_more_than_available() {
        let s = take(iter(vec![1, 2]), 10);
        assert_eq!(collect(s).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_drops_prefix() {
        assert_eq!(collect(skip(iter(0..5), 2)).await.unwrap(), vec![2, 3, 4]);
        assert!(collect(skip(iter(0..5), 9)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_round_robins() {
        let s = merge(vec![
            iter(vec![1, 2, 3]),
            iter(vec![10]),
            empty(),
            iter(vec![20, 21]),
        ]);
        assert_eq!(collect(s).await.unwrap(), vec![1, 10, 20, 2, 21, 3]);
    }

    #[tokio::test]
    async fn merge_of_nothing_is_empty() {
        let s: BoxStream<'_, u8> = merge(Vec::new());
        assert!(collect(s).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sort_all_orders_everything() {
        let s = sort_all(iter(vec![3, 1, 2]), |a: &i32, b: &i32| Ok(b.cmp(a)));
        assert_eq!(collect(s).await.unwrap(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn sort_all_fails_before_yielding() {
        let source = merge(vec![iter(vec![1, 2]), failed(StoreError::Backend("boom".into()))]);
        let mut s = sort_all(source, |a: &i32, b: &i32| Ok(a.cmp(b)));
        assert!(s.next().await.is_err());
    }

    #[tokio::test]
    async fn sort_all_comparator_error() {
        let s = sort_all(iter(vec![2, 1]), |_: &i32, _: &i32| {
            Err(StoreError::Backend("cannot compare".into()))
        });
        assert!(collect(s).await.is_err());
    }

    #[tokio::test]
    async fn map_transforms() {
        let s = map(iter(vec![1, 2]), |n: i32| Ok(n.to_string()));
        assert_eq!(collect(s).await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn receiver_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(1u8).await.unwrap();
        tx.send(2u8).await.unwrap();
        drop(tx);
        assert_eq!(collect(from_receiver(rx)).await.unwrap(), vec![1, 2]);
    }
}
