//! Checksum utilities for BlockVault
//!
//! Content checksums as reported by blob providers (base64 MD5) and the
//! slice checksum used for block integrity spot checks (hex MD5).

use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Base64 MD5 of a payload, in the form blob providers report as content MD5
#[must_use]
pub fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}

/// Streaming checksum over a sequence of block slices
pub struct SliceChecksum {
    ctx: md5::Context,
    bytes: u64,
}

impl SliceChecksum {
    /// Create an empty checksum
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: md5::Context::new(),
            bytes: 0,
        }
    }

    /// Feed the next slice
    pub fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes consumed so far
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish and return the lowercase hex digest
    #[must_use]
    pub fn finalize(self) -> String {
        hex::encode(self.ctx.compute().0)
    }
}

impl Default for SliceChecksum {
    fn default() -> Self {
        Self::new()
    }
}
