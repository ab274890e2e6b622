//! Deadlines and cooperative polling

use std::future::Future;
use std::time::Duration;

use crate::UtilError;

/// Default delay between predicate checks in [`wait_until`]
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_millis(2500);

/// Await `fut`, giving up after `limit`
///
/// Abandons waiting only; whatever `fut` was driving is dropped and no
/// cancellation reaches a backend call already on the wire.
pub async fn timeout<T, F>(limit: Duration, fut: F) -> Result<T, UtilError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| UtilError::Timeout(limit))
}

/// Poll an async predicate until it returns `true`
///
/// Sleeps `delay` between checks. With `limit` set, fails with
/// [`UtilError::Timeout`] once that much time has elapsed; without it,
/// waits indefinitely.
pub async fn wait_until<F, Fut>(
    mut predicate: F,
    limit: Option<Duration>,
    delay: Duration,
) -> Result<(), UtilError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async move {
        while !predicate().await {
            tokio::time::sleep(delay).await;
        }
    };
    match limit {
        Some(limit) => timeout(limit, poll).await,
        None => {
            poll.await;
            Ok(())
        }
    }
}
