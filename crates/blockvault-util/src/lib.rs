//! BlockVault Util - Concurrency primitives
//!
//! Backend-agnostic building blocks used by the block store and agent:
//! - **map_with_concurrency**: bounded fan-out with per-item outcomes
//! - **retry**: fixed-delay retry honouring a "do not retry" marker
//! - **wait_until** / **timeout**: cooperative polling and deadlines
//! - **Join**: keyed single-flight deduplication of in-flight work
//! - **run_background_worker**: self-rescheduling background loops
//! - **ObjectPool**: fixed-capacity pool of reusable values

pub mod concurrency;
pub mod join;
pub mod pool;
pub mod retry;
pub mod wait;
pub mod worker;

pub use concurrency::map_with_concurrency;
pub use join::Join;
pub use pool::ObjectPool;
pub use retry::{Retryable, retry, retry_with_observer};
pub use wait::{DEFAULT_WAIT_DELAY, timeout, wait_until};
pub use worker::{BackgroundWorker, DEFAULT_WORKER_DELAY, run_background_worker};

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the utilities themselves
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UtilError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
