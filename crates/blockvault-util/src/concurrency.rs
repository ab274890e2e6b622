//! Bounded-concurrency fan-out
//!
//! Runs an async operation over a batch with a cap on the number of
//! operations outstanding at any instant. Individual failures never abort
//! the batch; every item gets its own outcome.

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Run `op` over `items` with at most `limit` calls in flight
///
/// Results are returned in input order, one per item. Completion order
/// between items is unspecified. A `limit` of zero is treated as one.
pub async fn map_with_concurrency<T, R, E, F, Fut>(
    limit: usize,
    items: impl IntoIterator<Item = T>,
    mut op: F,
) -> Vec<Result<R, E>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let limit = limit.max(1);
    // Collect before streaming; a mapping closure inside the stream is not
    // general over the borrows in `op`'s future and breaks `Send` inference.
    let pending: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| op(item).map(move |result| (index, result)))
        .collect();
    let mut indexed: Vec<(usize, Result<R, E>)> =
        stream::iter(pending).buffer_unordered(limit).collect().await;

    indexed.sort_unstable_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, result)| result).collect()
}
