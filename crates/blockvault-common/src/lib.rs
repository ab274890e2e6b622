//! BlockVault Common - Shared types and utilities
//!
//! This crate provides the block and usage types, the error taxonomy,
//! the metadata slot codec and configuration used across all BlockVault
//! components.

pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{SliceChecksum, content_md5};
pub use codec::{decode_md, encode_md};
pub use config::{AgentConfig, BackendConfig, LogFormat, LoggingConfig, StoreConfig};
pub use error::{Error, Result};
pub use types::*;
