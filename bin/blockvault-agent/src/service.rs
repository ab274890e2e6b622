//! Agent service
//!
//! The operations an orchestrator (or another agent) invokes on this agent.
//! Block operations delegate to the [`BlockStore`]; the self-test and
//! lifecycle operations are handled here.

use crate::peer::{BlockSource, PeerConnector};
use async_trait::async_trait;
use blockvault_common::{BlockId, BlockMd, Error, Result, Slice, WriteOptions};
use blockvault_store::{BlockStore, DeleteResult};
use blockvault_util::{Join, ObjectPool, retry_with_observer, timeout};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Largest reply `self_test_io` will produce
pub const MAX_SELF_TEST_LENGTH: usize = 64 * 1024 * 1024;

const SELF_TEST_BUFFERS: usize = 8;
const SELF_TEST_BUFFER_CAPACITY: usize = 1024 * 1024;

const PEER_TEST_ATTEMPTS: u32 = 3;
const PEER_TEST_DELAY: Duration = Duration::from_secs(1);
const PEER_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Block reference in a bulk request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: BlockId,
}

/// Operations served by a BlockVault agent
pub struct AgentService {
    name: String,
    store: Arc<dyn BlockStore>,
    peers: Arc<dyn PeerConnector>,
    buffers: ObjectPool<Vec<u8>>,
    replications: Join<BlockId, Result<()>>,
    shutdown: watch::Sender<bool>,
}

impl AgentService {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn BlockStore>,
        peers: Arc<dyn PeerConnector>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            store,
            peers,
            buffers: ObjectPool::new(
                SELF_TEST_BUFFERS,
                || Vec::with_capacity(SELF_TEST_BUFFER_CAPACITY),
                |buf: &mut Vec<u8>| {
                    buf.clear();
                    buf.shrink_to(SELF_TEST_BUFFER_CAPACITY);
                },
            ),
            replications: Join::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub async fn write_block(&self, block_id: BlockId, data: Bytes) -> Result<()> {
        self.store
            .write_block(&BlockMd::new(block_id), data, WriteOptions::default())
            .await
    }

    pub async fn read_block(&self, block_id: &BlockId) -> Result<Bytes> {
        let block = self.store.read_block(&BlockMd::new(block_id.clone())).await?;
        Ok(block.data)
    }

    /// Copy a block from the agent at `source` into the local store
    ///
    /// Concurrent replications of the same block share one copy.
    pub async fn replicate_block(&self, block_id: BlockId, source: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let peers = Arc::clone(&self.peers);
        let source = source.to_string();
        let id = block_id.clone();
        self.replications
            .join(block_id, move || async move {
                let peer = peers.connect(&source).await?;
                let data = peer.read_block(&id).await?;
                let len = data.len();
                store
                    .write_block(&BlockMd::new(id.clone()), data, WriteOptions::default())
                    .await?;
                info!("replicate_block: copied {id} ({len} bytes) from {source}");
                Ok(())
            })
            .await
    }

    /// Number of replications still in flight
    pub fn pending_replications(&self) -> usize {
        self.replications.len()
    }

    pub async fn check_block(&self, block_id: &BlockId, slices: &[Slice]) -> Result<String> {
        self.store.check_block(block_id, slices).await
    }

    pub async fn delete_blocks(&self, blocks: &[BlockRef]) -> DeleteResult {
        let ids: Vec<BlockId> = blocks.iter().map(|b| b.id.clone()).collect();
        self.store.delete_blocks(&ids).await
    }

    /// Reply with `response_length` bytes, echoing `data` into the prefix
    pub fn self_test_io(&self, response_length: usize, data: Option<&[u8]>) -> Result<Bytes> {
        if response_length > MAX_SELF_TEST_LENGTH {
            return Err(Error::invalid_argument(format!(
                "self_test_io response length {response_length} exceeds {MAX_SELF_TEST_LENGTH}"
            )));
        }
        let mut buf = self.buffers.alloc().unwrap_or_default();
        buf.resize(response_length, 0);
        if let Some(data) = data {
            let n = data.len().min(response_length);
            buf[..n].copy_from_slice(&data[..n]);
        }
        let reply = Bytes::copy_from_slice(&buf);
        self.buffers.release(buf);
        Ok(reply)
    }

    /// Run `self_test_io` against the agent at `target`
    pub async fn self_test_peer(
        &self,
        target: &str,
        request_length: usize,
        response_length: usize,
    ) -> Result<()> {
        let request = Bytes::from(vec![0u8; request_length]);
        retry_with_observer(
            PEER_TEST_ATTEMPTS,
            PEER_TEST_DELAY,
            |remaining| {
                let request = request.clone();
                async move {
                    debug!("self_test_peer: {target}, {remaining} attempts left");
                    let peer = self.peers.connect(target).await?;
                    let reply =
                        timeout(PEER_TEST_TIMEOUT, peer.self_test_io(response_length, Some(request)))
                            .await??;
                    if reply.len() != response_length {
                        return Err(Error::backend(
                            "SELF_TEST_MISMATCH",
                            format!(
                                "{target} replied with {} bytes, expected {response_length}",
                                reply.len()
                            ),
                        ));
                    }
                    Ok::<_, Error>(())
                }
            },
            |err: &Error| warn!("self_test_peer: {target} failed, retrying: {err}"),
        )
        .await
    }

    /// Flush the usage ledger and ask the daemon to stop
    pub async fn kill_agent(&self) -> Result<()> {
        info!("kill_agent: shutting down {}", self.name);
        if let Err(e) = self.store.flush_usage().await {
            warn!("kill_agent: usage flush failed: {e}");
        }
        self.shutdown.send_replace(true);
        Ok(())
    }

    /// Receiver that flips to `true` once `kill_agent` was called
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[async_trait]
impl BlockSource for AgentService {
    async fn read_block(&self, block_id: &BlockId) -> Result<Bytes> {
        Self::read_block(self, block_id).await
    }

    async fn self_test_io(&self, response_length: usize, data: Option<Bytes>) -> Result<Bytes> {
        Self::self_test_io(self, response_length, data.as_deref())
    }
}
