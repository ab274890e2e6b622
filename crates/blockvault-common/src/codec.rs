//! Metadata slot codec
//!
//! Backends expose a flat string-to-string metadata map on each object.
//! Structured values are stored there as base64-encoded JSON so that they
//! survive providers that restrict header characters.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Encode a value for a single backend metadata field
pub fn encode_md<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Decode a value previously produced by [`encode_md`]
pub fn decode_md<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Deserialization(format!("invalid base64 metadata: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| Error::Deserialization(e.to_string()))
}
