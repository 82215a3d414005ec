//! Concurrent fan-out over child stores.

use std::future::Future;
use std::sync::Arc;

use dsx_store::{SharedDatastore, StoreError, StoreResult};
use tokio::task::{JoinError, JoinSet};

/// Run `op` against every store concurrently and wait for all of them.
pub(crate) async fn for_each<F, Fut>(stores: &[SharedDatastore], op: F) -> StoreResult<()>
where
    F: Fn(SharedDatastore) -> Fut,
    Fut: Future<Output = StoreResult<()>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for store in stores {
        tasks.spawn(op(Arc::clone(store)));
    }
    join_all(tasks).await
}

/// Wait for every task, returning the first failure in completion order.
pub(crate) async fn join_all(mut tasks: JoinSet<StoreResult<()>>) -> StoreResult<()> {
    let mut first_err = None;
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = flatten(joined) {
            first_err.get_or_insert(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// A task's own result, or [`StoreError::Aborted`] if it panicked or was
/// cancelled.
pub(crate) fn flatten(joined: Result<StoreResult<()>, JoinError>) -> StoreResult<()> {
    joined.unwrap_or_else(|err| Err(StoreError::Aborted(err.to_string())))
}
