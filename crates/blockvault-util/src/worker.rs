//! Background worker scheduling
//!
//! A worker runs one batch at a time on a tokio task. The delay before the
//! next batch comes from the batch itself, or falls back to the worker's
//! default. Failed batches are logged and rescheduled with the default delay.
//!
//! The scheduling task is detached: it never keeps the runtime alive, so a
//! process whose only remaining work is a worker's timer can still exit.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Delay used when a worker does not specify one
pub const DEFAULT_WORKER_DELAY: Duration = Duration::from_secs(10);

/// A periodically scheduled unit of background work
#[async_trait]
pub trait BackgroundWorker: Send + Sync + 'static {
    /// Worker name for logging
    fn name(&self) -> &str;

    /// Default delay between batches
    fn delay(&self) -> Duration {
        DEFAULT_WORKER_DELAY
    }

    /// Delay before the first batch (defaults to [`BackgroundWorker::delay`])
    fn boot_delay(&self) -> Option<Duration> {
        None
    }

    /// Run one batch, optionally returning the delay before the next one
    async fn run_batch(&self) -> anyhow::Result<Option<Duration>>;
}

/// Start `worker` on a detached tokio task
///
/// Abort the returned handle to stop the loop.
pub fn run_background_worker<W>(worker: Arc<W>) -> JoinHandle<()>
where
    W: BackgroundWorker + ?Sized,
{
    info!(worker = worker.name(), "background worker init");
    tokio::spawn(async move {
        let boot_delay = worker.boot_delay().unwrap_or_else(|| worker.delay());
        tokio::time::sleep(boot_delay).await;
        loop {
            let next = match worker.run_batch().await {
                Ok(delay) => delay.unwrap_or_else(|| worker.delay()),
                Err(e) => {
                    error!(worker = worker.name(), "background worker batch failed: {e:#}");
                    worker.delay()
                }
            };
            debug!(worker = worker.name(), "next batch in {:?}", next);
            tokio::time::sleep(next).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    struct RecordingWorker {
        started: Instant,
        runs: Mutex<Vec<Duration>>,
        fail_on: Vec<usize>,
        next_delay: Option<Duration>,
    }

    impl RecordingWorker {
        fn new(fail_on: Vec<usize>, next_delay: Option<Duration>) -> Self {
            Self {
                started: Instant::now(),
                runs: Mutex::new(Vec::new()),
                fail_on,
                next_delay,
            }
        }
    }

    #[async_trait]
    impl BackgroundWorker for RecordingWorker {
        fn name(&self) -> &str {
            "recording"
        }

        fn delay(&self) -> Duration {
            Duration::from_secs(10)
        }

        fn boot_delay(&self) -> Option<Duration> {
            Some(Duration::from_secs(1))
        }

        async fn run_batch(&self) -> anyhow::Result<Option<Duration>> {
            let run = {
                let mut runs = self.runs.lock();
                runs.push(self.started.elapsed());
                runs.len()
            };
            if self.fail_on.contains(&run) {
                anyhow::bail!("batch {run} failed");
            }
            Ok(self.next_delay)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_delay_then_default_delay() {
        let worker = Arc::new(RecordingWorker::new(vec![], None));
        let handle = run_background_worker(Arc::clone(&worker));

        tokio::time::sleep(Duration::from_millis(21_500)).await;
        handle.abort();

        let runs = worker.runs.lock().clone();
        assert_eq!(
            runs,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(11),
                Duration::from_secs(21)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_controls_next_delay() {
        let worker = Arc::new(RecordingWorker::new(vec![], Some(Duration::from_secs(2))));
        let handle = run_background_worker(Arc::clone(&worker));

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        handle.abort();

        assert_eq!(worker.runs.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_loop_running() {
        let worker = Arc::new(RecordingWorker::new(vec![1, 2], Some(Duration::from_secs(1))));
        let handle = run_background_worker(Arc::clone(&worker));

        // Failed batches fall back to the 10s default delay
        tokio::time::sleep(Duration::from_millis(22_500)).await;
        handle.abort();

        let runs = worker.runs.lock().clone();
        assert_eq!(
            runs,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(11),
                Duration::from_secs(21),
                Duration::from_secs(22)
            ]
        );
    }
}
