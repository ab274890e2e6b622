//! Periodic usage ledger flush

use async_trait::async_trait;
use blockvault_store::BlockStore;
use blockvault_util::BackgroundWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Delay before retrying a flush that failed transiently
const FLUSH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Persists the usage ledger whenever it changed
pub struct UsageFlushWorker {
    store: Arc<dyn BlockStore>,
    interval: Duration,
}

impl UsageFlushWorker {
    pub fn new(store: Arc<dyn BlockStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl BackgroundWorker for UsageFlushWorker {
    fn name(&self) -> &str {
        "usage-flush"
    }

    fn delay(&self) -> Duration {
        self.interval
    }

    async fn run_batch(&self) -> anyhow::Result<Option<Duration>> {
        match self.store.flush_usage().await {
            Ok(()) => Ok(None),
            Err(e) if e.is_retryable() => {
                let retry_in = self.interval.min(FLUSH_RETRY_DELAY);
                warn!(code = e.rpc_code(), "usage flush failed, retrying in {retry_in:?}: {e}");
                Ok(Some(retry_in))
            }
            Err(e) => Err(e.into()),
        }
    }
}
