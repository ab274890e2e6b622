//! Error types for BlockVault
//!
//! Every backend failure is funnelled into this enum before it reaches a
//! caller. Two kinds form the stable taxonomy that placement and
//! replication logic branch on (`StorageNotExist`, `AuthFailed`); provider
//! failures outside the taxonomy pass through as `Backend`.

use blockvault_util::Retryable;
use thiserror::Error;

/// Common result type for BlockVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for BlockVault
///
/// `Clone` so that a single in-flight computation can hand the same
/// failure to every caller joined on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Taxonomy errors
    #[error("storage does not exist: {0}")]
    StorageNotExist(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("backend error ({code}): {message}")]
    Backend { code: String, message: String },

    // Local errors
    #[error("block not found: {block_id}")]
    BlockNotFound { block_id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a passthrough backend error
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error belongs to the stable taxonomy
    #[must_use]
    pub const fn is_taxonomy(&self) -> bool {
        matches!(self, Self::StorageNotExist(_) | Self::AuthFailed(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::BlockNotFound { .. })
    }

    /// Check if a caller may reasonably try again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Backend { .. })
    }

    /// Stable error code reported to the orchestrator
    #[must_use]
    pub fn rpc_code(&self) -> &str {
        match self {
            Self::StorageNotExist(_) => "STORAGE_NOT_EXIST",
            Self::AuthFailed(_) => "AUTH_FAILED",
            Self::Backend { code, .. } => code,
            Self::BlockNotFound { .. } => "NO_SUCH_BLOCK",
            Self::InvalidArgument(_) => "BAD_REQUEST",
            Self::Timeout(_) => "TIMEOUT",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Serialization(_) | Self::Deserialization(_) | Self::Internal(_) => "INTERNAL",
        }
    }
}

impl Retryable for Error {
    /// Taxonomy errors need re-provisioning or new credentials upstream;
    /// retrying locally cannot succeed.
    fn do_not_retry(&self) -> bool {
        matches!(
            self,
            Self::StorageNotExist(_)
                | Self::AuthFailed(_)
                | Self::InvalidArgument(_)
                | Self::Configuration(_)
        )
    }
}

impl From<blockvault_util::UtilError> for Error {
    fn from(err: blockvault_util::UtilError) -> Self {
        match err {
            blockvault_util::UtilError::Timeout(elapsed) => {
                Self::Timeout(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}
