//! BlockVault Agent - block storage agent
//!
//! Serves block operations for one backing store and keeps its usage
//! ledger persisted in the background.

pub mod cli;
pub mod peer;
pub mod service;
pub mod telemetry;
pub mod worker;

pub use peer::{BlockSource, PeerConnector, PeerRegistry};
pub use service::{AgentService, BlockRef};
pub use worker::UsageFlushWorker;
