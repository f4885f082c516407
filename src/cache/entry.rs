//! Cache entry with integrity metadata.
//!
//! Entries are immutable values: an update always builds a fresh
//! [`CacheEntry`] rather than mutating one in place, so a concurrent reader
//! either sees the old complete entry or the new complete entry, never a
//! half-written one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::checksum::checksum_value;

/// Bumped when the on-disk entry layout changes; mismatching entries are
/// discarded on read like corruption.
pub const ENTRY_SCHEMA_VERSION: u32 = 1;

/// Outcome of a read-time integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Ok,
    /// Stored checksum no longer matches the recomputed one.
    Corrupt { expected: u32, actual: u32 },
    /// Entry was written by an incompatible schema version.
    SchemaMismatch { version: u32 },
}

/// A cached value plus the metadata needed to distrust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub written_at: DateTime<Utc>,
    pub version: u32,
    pub checksum: u32,
    pub expires_at: DateTime<Utc>,
}

impl<T: Serialize + DeserializeOwned> CacheEntry<T> {
    /// Build an entry, computing the checksum over the serialized value.
    pub fn new(data: T, ttl: Duration) -> Result<Self, serde_json::Error> {
        let checksum = checksum_value(&data)?;
        let written_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Ok(Self {
            data,
            written_at,
            version: ENTRY_SCHEMA_VERSION,
            checksum,
            expires_at: written_at + ttl,
        })
    }

    /// Whether the entry is past its TTL at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Recompute the checksum and compare against what was stored at write
    /// time. A mismatch means the entry (or its persisted form) was damaged
    /// after the fact and must not be served.
    pub fn integrity(&self) -> Integrity {
        if self.version != ENTRY_SCHEMA_VERSION {
            return Integrity::SchemaMismatch { version: self.version };
        }
        match checksum_value(&self.data) {
            Ok(actual) if actual == self.checksum => Integrity::Ok,
            Ok(actual) => Integrity::Corrupt { expected: self.checksum, actual },
            // If the value no longer serializes, it cannot be trusted either.
            Err(_) => Integrity::Corrupt { expected: self.checksum, actual: 0 },
        }
    }
}
