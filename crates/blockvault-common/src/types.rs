//! Core type definitions for BlockVault
//!
//! Identifiers, block metadata, usage accounting and capacity reporting
//! types shared by the store and the agent.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Add, AddAssign, Neg};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Reported free space for backends whose capacity is managed by the provider
pub const PETABYTE: u64 = 1024 * 1024 * 1024 * 1024 * 1024;

/// Opaque block identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Display, From, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Create a block id from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random block id (32 lowercase hex characters)
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for BlockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller-defined metadata co-stored with a block's payload
///
/// Only `id` and `is_preallocated` are interpreted by the store; every
/// other field is carried opaquely and must survive an encode/decode
/// round trip unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMd {
    /// Block identifier
    pub id: BlockId,
    /// Placeholder block that does not count towards usage
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_preallocated: bool,
    /// Opaque caller fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BlockMd {
    /// Create metadata for a block with no extra fields
    pub fn new(id: impl Into<BlockId>) -> Self {
        Self {
            id: id.into(),
            is_preallocated: false,
            fields: Map::new(),
        }
    }

    /// Add an opaque field
    ///
    /// Fails for the reserved keys `id` and `is_preallocated`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let key = key.into();
        if key == "id" || key == "is_preallocated" {
            return Err(Error::invalid_argument(format!(
                "block metadata field name is reserved: {key}"
            )));
        }
        self.fields.insert(key, value.into());
        Ok(self)
    }

    /// Mark the block as a pre-allocated placeholder
    #[must_use]
    pub const fn preallocated(mut self) -> Self {
        self.is_preallocated = true;
        self
    }

    /// Look up an opaque field
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Aggregate usage attributed to one store instance
///
/// Signed so that deltas and approximations (e.g. deleting a block that was
/// written with usage accounting disabled) never wrap around.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Total bytes (payload + encoded metadata)
    pub size: i64,
    /// Number of blocks
    pub count: i64,
}

impl Usage {
    /// Zero usage
    pub const ZERO: Self = Self { size: 0, count: 0 };

    /// Create a usage value
    #[must_use]
    pub const fn new(size: i64, count: i64) -> Self {
        Self { size, count }
    }

    /// Check whether this usage is zero in both counters
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.size == 0 && self.count == 0
    }

    /// Used bytes clamped at zero for capacity reporting
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            size: self.size + rhs.size,
            count: self.count + rhs.count,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.size += rhs.size;
        self.count += rhs.count;
    }
}

impl Neg for Usage {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            size: -self.size,
            count: -self.count,
        }
    }
}

/// Capacity report for a store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

impl StorageInfo {
    /// Capacity report for a provider-managed (effectively unbounded) backend
    #[must_use]
    pub const fn unbounded(used: u64) -> Self {
        Self {
            total: PETABYTE.saturating_add(used),
            free: PETABYTE,
            used,
        }
    }
}

/// Byte range `[start, end)` of a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub start: u64,
    pub end: u64,
}

impl Slice {
    /// Create a slice, rejecting inverted ranges
    pub fn new(start: u64, end: u64) -> Result<Self> {
        let slice = Self { start, end };
        slice.validate()?;
        Ok(slice)
    }

    /// Validate that the range is not inverted
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(Error::invalid_argument(format!(
                "slice start {} is past its end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Length of the range in bytes
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Check if the range is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Options for a block write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Skip usage accounting for this write
    #[serde(default)]
    pub ignore_usage: bool,
}

impl WriteOptions {
    /// Options that skip usage accounting
    #[must_use]
    pub const fn ignore_usage() -> Self {
        Self { ignore_usage: true }
    }
}
