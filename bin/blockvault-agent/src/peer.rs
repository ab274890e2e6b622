//! Peer agents
//!
//! Replication and peer self-tests talk to other agents through these
//! traits. How an address reaches a remote agent is up to the connector.

use async_trait::async_trait;
use blockvault_common::{BlockId, Error, Result};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// Another agent, as seen from this one
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch a block's payload
    async fn read_block(&self, block_id: &BlockId) -> Result<Bytes>;

    /// Echo test: reply with `response_length` bytes
    async fn self_test_io(&self, response_length: usize, data: Option<Bytes>) -> Result<Bytes>;
}

/// Resolves peer addresses to agents
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn BlockSource>>;
}

/// Connector over a table of known agents
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Arc<dyn BlockSource>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the agent reachable at `address`
    pub fn register(&self, address: impl Into<String>, peer: Arc<dyn BlockSource>) {
        self.peers.insert(address.into(), peer);
    }

    pub fn unregister(&self, address: &str) -> bool {
        self.peers.remove(address).is_some()
    }
}

#[async_trait]
impl PeerConnector for PeerRegistry {
    async fn connect(&self, address: &str) -> Result<Arc<dyn BlockSource>> {
        self.peers
            .get(address)
            .map(|peer| Arc::clone(peer.value()))
            .ok_or_else(|| Error::backend("PEER_UNREACHABLE", format!("no agent at {address}")))
    }
}
