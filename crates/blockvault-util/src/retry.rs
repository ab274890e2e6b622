//! Fixed-delay retry
//!
//! The attempt budget is an explicit decrementing counter; there is no
//! recursion, so an unbounded budget (`u32::MAX`) cannot grow the stack.

use std::future::Future;
use std::time::Duration;

/// Errors that may carry a "do not retry" marker
pub trait Retryable {
    /// Abort the retry loop immediately when `true`
    fn do_not_retry(&self) -> bool {
        false
    }
}

impl Retryable for std::io::Error {}

impl Retryable for anyhow::Error {}

impl Retryable for String {}

/// Invoke `op` up to `attempts` times, sleeping `delay` between attempts
///
/// `op` receives the number of attempts remaining (including the current
/// one). An error whose [`Retryable::do_not_retry`] is `true` is returned
/// immediately. An `attempts` of zero is treated as one.
pub async fn retry<T, E, F, Fut>(attempts: u32, delay: Duration, op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_observer(attempts, delay, op, |_: &E| {}).await
}

/// Like [`retry`], calling `on_failure` once per failed attempt that will be retried
pub async fn retry_with_observer<T, E, F, Fut, O>(
    attempts: u32,
    delay: Duration,
    mut op: F,
    mut on_failure: O,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(&E),
{
    let mut remaining = attempts.max(1);
    loop {
        match op(remaining).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                remaining -= 1;
                if remaining == 0 || err.do_not_retry() {
                    return Err(err);
                }
                on_failure(&err);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
