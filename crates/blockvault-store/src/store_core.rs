//! Shared store behavior
//!
//! `StoreCore` is the part of a block store that does not depend on the
//! provider: key layout, metadata slot encoding, the usage ledger, I/O
//! statistics and the mapping of provider failures onto the error taxonomy.
//! Backend adapters own one and delegate to it.

use crate::stats::IoStats;
use crate::transport::BackendError;
use crate::usage::UsageLedger;
use blockvault_common::{BlockId, BlockMd, Error, Result, Usage, decode_md, encode_md};
use blockvault_util::Join;
use std::collections::HashMap;
use tracing::{error, warn};

/// Metadata slot holding the encoded block metadata
pub const BLOCK_MD_KEY: &str = "blockmd";
/// Slot name used by older writers, accepted on read
pub const LEGACY_BLOCK_MD_KEY: &str = "block_md";
/// Metadata slot holding the encoded usage ledger
pub const USAGE_MD_KEY: &str = "usage";

/// Provider-independent state and helpers of one store instance
pub struct StoreCore {
    target: String,
    base_path: String,
    blocks_path: String,
    usage_path: String,
    pub(crate) ledger: UsageLedger,
    pub(crate) stats: IoStats,
    pub(crate) loader: Join<&'static str, ()>,
}

impl StoreCore {
    /// Create the core for a store rooted at `base_path` in container `target`
    pub fn new(target: impl Into<String>, base_path: &str) -> Self {
        let base_path = base_path.trim_matches('/').to_string();
        Self {
            target: target.into(),
            blocks_path: format!("{base_path}/blocks_tree"),
            usage_path: format!("{base_path}/usage"),
            base_path,
            ledger: UsageLedger::new(),
            stats: IoStats::default(),
            loader: Join::new(),
        }
    }

    pub fn blocks_path(&self) -> &str {
        &self.blocks_path
    }

    pub fn usage_path(&self) -> &str {
        &self.usage_path
    }

    /// Listing prefix covering every object owned by this store
    pub fn owned_prefix(&self) -> String {
        format!("{}/", self.base_path)
    }

    /// Storage key of a block
    ///
    /// Blocks are spread over sub-directories named after the last three
    /// characters of their id when those are hex digits.
    pub fn block_key(&self, id: &BlockId) -> String {
        format!("{}/{}/{}", self.blocks_path, block_dir(id.as_str()), id)
    }

    /// Encode block metadata for its slot
    pub fn encode_block_md(block_md: &BlockMd) -> Result<String> {
        encode_md(block_md)
    }

    /// Decode block metadata from a provider metadata map
    pub fn decode_block_md(metadata: &HashMap<String, String>) -> Result<BlockMd> {
        let encoded = metadata
            .get(BLOCK_MD_KEY)
            .or_else(|| metadata.get(LEGACY_BLOCK_MD_KEY))
            .ok_or_else(|| Error::Deserialization("object carries no block metadata".into()))?;
        decode_md(encoded)
    }

    /// Usage attributed to a block
    ///
    /// Pre-allocated placeholders count as nothing.
    pub fn block_usage(block_md: &BlockMd, data_len: u64, encoded_md_len: usize) -> Usage {
        if block_md.is_preallocated {
            return Usage::ZERO;
        }
        let size = data_len.saturating_add(encoded_md_len as u64);
        Usage::new(i64::try_from(size).unwrap_or(i64::MAX), 1)
    }

    /// Map a provider failure onto the error taxonomy, logging it
    ///
    /// `subject` names what the operation was about (a block id or a key).
    pub fn map_error(&self, op: &str, subject: &str, err: BackendError) -> Error {
        match err {
            BackendError::ContainerNotFound(_) => {
                error!(op, container = %self.target, code = err.code(), "container does not exist: {err}");
                Error::StorageNotExist(format!(
                    "container {} not found. got error {err}",
                    self.target
                ))
            }
            BackendError::AuthenticationFailed(_) => {
                error!(op, container = %self.target, code = err.code(), "access denied: {err}");
                Error::AuthFailed(format!(
                    "access denied to container {}. got error {err}",
                    self.target
                ))
            }
            BackendError::NotFound(_) => {
                warn!(op, container = %self.target, "{subject} not found");
                Error::BlockNotFound {
                    block_id: subject.to_string(),
                }
            }
            BackendError::Other { code, message } => {
                error!(op, container = %self.target, code = %code, "{subject}: {message}");
                Error::Backend { code, message }
            }
        }
    }

    /// Roll back a write's usage delta, count the failure and map the error
    pub fn handle_write_error(
        &self,
        block_id: &BlockId,
        applied: Option<Usage>,
        err: BackendError,
    ) -> Error {
        if let Some(applied) = applied {
            self.ledger.update(-applied);
        }
        self.stats.record_write(0, true);
        self.map_error("write_block", block_id.as_str(), err)
    }

    /// Count a read failure and map the error
    pub fn handle_read_error(&self, op: &str, block_id: &BlockId, err: BackendError) -> Error {
        self.stats.record_read(0, true);
        self.map_error(op, block_id.as_str(), err)
    }
}

fn block_dir(id: &str) -> String {
    let tail = id
        .char_indices()
        .rev()
        .nth(2)
        .map_or("", |(idx, _)| &id[idx..]);
    if tail.len() == 3 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("{tail}.blocks")
    } else {
        "other.blocks".to_string()
    }
}
