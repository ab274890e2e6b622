//! Backend transport abstraction
//!
//! A transport is the thin, provider-specific layer under a block store:
//! raw object calls against one container, reporting failures in the
//! provider's own terms. Mapping those failures into the BlockVault error
//! taxonomy is the store's job, not the transport's.
//!
//! # Transports
//!
//! - `memory`: in-process blob account (development, tests, fault injection)
//! - `fs`: directory tree on a local or network-mounted filesystem

pub mod fs;
pub mod memory;

pub use fs::FsTransport;
pub use memory::{BlobOp, MemoryBlobService, MemoryTransport};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};

/// Result type for transport operations
pub type TransportResult<T> = Result<T, BackendError>;

/// Object payload delivered in chunks
pub type ByteStream = BoxStream<'static, TransportResult<Bytes>>;

/// Provider-level failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("{code}: {message}")]
    Other { code: String, message: String },
}

impl BackendError {
    /// Create an error outside the well-known conditions
    pub fn other(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Provider error code
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::ContainerNotFound(_) => "ContainerNotFound",
            Self::AuthenticationFailed(_) => "AuthenticationFailed",
            Self::NotFound(_) => "BlobNotFound",
            Self::Other { code, .. } => code,
        }
    }

    /// Check if the object itself is absent
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Object properties reported by the backend
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobProperties {
    /// Payload length in bytes
    pub content_length: u64,
    /// Base64 MD5 of the payload, when the provider tracks one
    pub content_md5: Option<String>,
    /// Provider metadata slots
    pub metadata: HashMap<String, String>,
}

/// An object fetched as a stream
pub struct BlobObject {
    pub properties: BlobProperties,
    pub body: ByteStream,
}

/// One entry of a listing page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub content_length: u64,
}

/// One page of a prefix listing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// Opaque token for the next page; `None` when the listing is complete
    pub continuation_token: Option<String>,
}

/// Description of the target a transport is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportInfo {
    /// Provider name
    pub provider: &'static str,
    /// Target container (bucket)
    pub container: String,
    /// Connection parameters with secrets redacted
    pub connection_params: BTreeMap<String, String>,
}

/// Raw object operations against one container
#[async_trait]
pub trait BlobTransport: Send + Sync + 'static {
    /// Describe the bound target
    fn describe(&self) -> TransportInfo;

    /// Whether [`BlobTransport::get_object_range`] avoids transferring the whole object
    fn supports_range_reads(&self) -> bool {
        false
    }

    /// Fetch an object's properties and a stream of its payload
    async fn get_object(&self, key: &str) -> TransportResult<BlobObject>;

    /// Fetch bytes `[start, end)` of an object, clamped to its length
    async fn get_object_range(&self, key: &str, start: u64, end: u64) -> TransportResult<Bytes> {
        let _ = (key, start, end);
        Err(BackendError::other(
            "NotImplemented",
            format!("{} does not support range reads", self.describe().provider),
        ))
    }

    /// Fetch properties and metadata without the payload
    async fn get_properties(&self, key: &str) -> TransportResult<BlobProperties>;

    /// Create or replace an object
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> TransportResult<()>;

    /// Delete an object
    async fn delete_object(&self, key: &str) -> TransportResult<()>;

    /// List objects whose names start with `prefix`, in name order
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_results: usize,
    ) -> TransportResult<ListPage>;
}

/// Encode the last returned name as an opaque continuation token
pub(crate) fn encode_token(last_name: &str) -> String {
    URL_SAFE_NO_PAD.encode(last_name.as_bytes())
}

/// Decode a continuation token back into the name to resume after
pub(crate) fn decode_token(token: &str) -> TransportResult<String> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| BackendError::other("InvalidContinuationToken", token.to_string()))
}

/// Clamp a byte range to an object of `len` bytes
pub(crate) fn clamp_range(start: u64, end: u64, len: u64) -> (u64, u64) {
    let end = end.min(len);
    (start.min(end), end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = encode_token("base/blocks_tree/abc.blocks/xyzabc");
        assert!(!token.contains('/'));
        assert_eq!(
            decode_token(&token).unwrap(),
            "base/blocks_tree/abc.blocks/xyzabc"
        );
        assert!(decode_token("***").is_err());
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(0, 10, 100), (0, 10));
        assert_eq!(clamp_range(90, 200, 100), (90, 100));
        assert_eq!(clamp_range(150, 200, 100), (100, 100));
    }

    #[test]
    fn test_backend_error_codes() {
        assert_eq!(BackendError::ContainerNotFound("c".into()).code(), "ContainerNotFound");
        assert_eq!(BackendError::NotFound("k".into()).code(), "BlobNotFound");
        assert_eq!(BackendError::other("ServerBusy", "x").code(), "ServerBusy");
        assert!(BackendError::NotFound("k".into()).is_not_found());
    }
}
