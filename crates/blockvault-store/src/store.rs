//! Block store contract
//!
//! Every backend presents the same operations to the orchestrator. Failures
//! reaching the caller are already mapped onto the error taxonomy:
//! `StorageNotExist` and `AuthFailed` for the two well-known provider
//! conditions, `Backend` for everything else.

use crate::stats::IoStatsSnapshot;
use crate::usage::StoreState;
use async_trait::async_trait;
use blockvault_common::{BlockId, BlockMd, Result, Slice, StorageInfo, WriteOptions};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;

/// Payload and metadata of a block
#[derive(Clone, Debug, PartialEq)]
pub struct BlockData {
    pub data: Bytes,
    pub block_md: BlockMd,
}

/// Metadata of a block plus the backend-reported content checksum
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMdInfo {
    pub block_md: BlockMd,
    /// Base64 content MD5, when the backend reports one
    pub store_md5: Option<String>,
}

/// Outcome of a bulk delete
///
/// The two lists partition the requested ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub failed_block_ids: Vec<BlockId>,
    pub succeeded_block_ids: Vec<BlockId>,
}

/// Description of the target a store is bound to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockStoreInfo {
    pub provider: String,
    pub container: String,
    /// Connection parameters with secrets redacted
    pub connection_params: BTreeMap<String, String>,
    pub blocks_path: String,
}

/// Block storage bound to one backend target
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Load the usage ledger
    ///
    /// A missing or unreadable ledger is logged and the store proceeds from
    /// zero usage. Concurrent calls share one load.
    async fn init(&self) -> Result<()>;

    /// Capacity report; initializes the store on first use
    async fn get_storage_info(&self) -> Result<StorageInfo>;

    /// Store a block, replacing any previous payload under the same id
    async fn write_block(&self, block_md: &BlockMd, data: Bytes, options: WriteOptions)
    -> Result<()>;

    /// Fetch a block's payload and metadata
    async fn read_block(&self, block_md: &BlockMd) -> Result<BlockData>;

    /// Fetch a block's metadata without its payload
    async fn read_block_md(&self, block_md: &BlockMd) -> Result<BlockMdInfo>;

    /// Lowercase hex MD5 over the concatenation of `slices`
    ///
    /// Slices past the end of the block are clamped.
    async fn check_block(&self, block_id: &BlockId, slices: &[Slice]) -> Result<String>;

    /// Delete blocks with bounded concurrency
    ///
    /// Only per-item failures other than "not found" land in
    /// `failed_block_ids`; this call itself does not fail.
    async fn delete_blocks(&self, block_ids: &[BlockId]) -> DeleteResult;

    /// Remove every object under the store's path prefix
    ///
    /// Returns the number of objects visited.
    async fn cleanup_target_path(&self) -> Result<u64>;

    /// Probe reachability and authorization without side effects
    async fn test_store_validity(&self) -> Result<()>;

    /// Persist the usage ledger if it changed since the last flush
    async fn flush_usage(&self) -> Result<()>;

    fn get_block_store_info(&self) -> BlockStoreInfo;

    fn io_stats(&self) -> IoStatsSnapshot;

    fn state(&self) -> StoreState;
}
