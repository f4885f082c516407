// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed, integrity-checked cache for one data kind.
//!
//! [`ChecksumCache`] owns the in-memory tier for a single namespace and,
//! for persist-worthy kinds, mirrors writes to the [`LocalStore`]. Every
//! read re-verifies the stored checksum; a corrupt or expired entry is
//! removed and reported as a miss, never served.
//!
//! Removal semantics follow the tier split: the in-memory entry goes away
//! synchronously, the persisted mirror is deleted from a spawned task, so
//! callers must not assume the persistent delete has completed when a call
//! returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::DataKind;
use crate::storage::LocalStore;
use super::entry::{CacheEntry, Integrity};
use super::pattern::key_matches;

/// Running counters for one namespace. Diagnostics only; no functional
/// behavior depends on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub corruptions: u64,
}

impl CacheCounters {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ChecksumCache<T> {
    kind: DataKind,
    memory: DashMap<String, CacheEntry<T>>,
    store: Option<Arc<dyn LocalStore>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    corruptions: AtomicU64,
}

impl<T> ChecksumCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a cache for `kind`. `store` should be `None` for kinds that
    /// are not persist-worthy; the cache honors whatever it is given.
    #[must_use]
    pub fn new(kind: DataKind, store: Option<Arc<dyn LocalStore>>) -> Self {
        Self {
            kind,
            memory: DashMap::new(),
            store,
            max_entries: kind.max_entries(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    #[must_use]
    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            corruptions: self.corruptions.load(Ordering::Relaxed),
        }
    }

    /// Look up `key`, checking the memory tier first and falling back to the
    /// persisted tier with write-through promotion.
    pub async fn get(&self, key: &str) -> Option<T> {
        if let Some(value) = self.get_memory(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_hit(self.kind);
            return Some(value);
        }

        if let Some(value) = self.load_persisted(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_hit(self.kind);
            return Some(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss(self.kind);
        None
    }

    /// Memory-tier lookup with integrity and expiry checks.
    fn get_memory(&self, key: &str) -> Option<T> {
        let entry = self.memory.get(key)?;
        match entry.integrity() {
            Integrity::Ok => {}
            Integrity::Corrupt { expected, actual } => {
                drop(entry);
                warn!(
                    kind = %self.kind, key,
                    expected, actual,
                    "Cache entry failed checksum, discarding"
                );
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_corruption(self.kind);
                self.remove(key);
                return None;
            }
            Integrity::SchemaMismatch { version } => {
                drop(entry);
                debug!(kind = %self.kind, key, version, "Cache entry from old schema, discarding");
                self.remove(key);
                return None;
            }
        }
        if entry.is_expired_at(Utc::now()) {
            drop(entry);
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.remove(key);
            return None;
        }
        Some(entry.data.clone())
    }

    /// Persisted-tier lookup; a valid entry is promoted into memory.
    async fn load_persisted(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        let full_key = self.full_key(key);

        let raw = match store.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                // Caching is best-effort: a broken store is a miss, not an error
                debug!(kind = %self.kind, key, error = %e, "Persisted read failed");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(kind = %self.kind, key, error = %e, "Persisted entry unreadable, deleting");
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_corruption(self.kind);
                self.spawn_persist_delete(full_key);
                return None;
            }
        };

        match entry.integrity() {
            Integrity::Ok => {}
            Integrity::Corrupt { expected, actual } => {
                warn!(
                    kind = %self.kind, key,
                    expected, actual,
                    "Persisted entry failed checksum, deleting"
                );
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_corruption(self.kind);
                self.spawn_persist_delete(full_key);
                return None;
            }
            Integrity::SchemaMismatch { .. } => {
                self.spawn_persist_delete(full_key);
                return None;
            }
        }

        if entry.is_expired_at(Utc::now()) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.spawn_persist_delete(full_key);
            return None;
        }

        let value = entry.data.clone();
        self.memory.insert(key.to_string(), entry);
        self.enforce_bound();
        Some(value)
    }

    /// Write `value` under `key`, mirroring to the persisted tier when one
    /// is attached. Serialization failures are logged and swallowed: the
    /// cache must never block the primary write path.
    pub async fn set(&self, key: &str, value: T) {
        let entry = match CacheEntry::new(value, self.kind.ttl()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(kind = %self.kind, key, error = %e, "Value not cacheable, skipping");
                return;
            }
        };

        if let Some(store) = &self.store {
            match serde_json::to_string(&entry) {
                Ok(raw) => {
                    if let Err(e) = store.put(&self.full_key(key), &raw).await {
                        warn!(kind = %self.kind, key, error = %e, "Persisted cache write failed");
                    }
                }
                Err(e) => warn!(kind = %self.kind, key, error = %e, "Entry serialization failed"),
            }
        }

        self.memory.insert(key.to_string(), entry);
        self.enforce_bound();
    }

    /// Remove one key: memory synchronously, persisted tier asynchronously.
    pub fn invalidate(&self, key: &str) {
        self.remove(key);
    }

    /// Remove every key matching a single-`*` wildcard pattern.
    ///
    /// Memory removal is synchronous; the persisted tier is cleaned by a
    /// spawned scan-and-delete task.
    pub fn invalidate_matching(&self, pattern: &str) {
        let doomed: Vec<String> = self
            .memory
            .iter()
            .filter(|r| key_matches(pattern, r.key()))
            .map(|r| r.key().clone())
            .collect();
        for key in &doomed {
            self.memory.remove(key);
        }

        if let Some(store) = &self.store {
            let store = store.clone();
            let prefix = self.kind.key_prefix().to_string();
            let pattern = pattern.to_string();
            tokio::spawn(async move {
                match store.scan_prefix(&prefix).await {
                    Ok(rows) => {
                        for (full_key, _) in rows {
                            let bare = &full_key[prefix.len()..];
                            if key_matches(&pattern, bare) {
                                if let Err(e) = store.delete(&full_key).await {
                                    debug!(key = %full_key, error = %e, "Pattern delete failed");
                                }
                            }
                        }
                    }
                    Err(e) => debug!(prefix = %prefix, error = %e, "Pattern scan failed"),
                }
            });
        }
    }

    /// Drop expired entries from the memory tier. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let doomed: Vec<String> = self
            .memory
            .iter()
            .filter(|r| r.value().is_expired_at(now))
            .map(|r| r.key().clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        let count = doomed.len();
        if count > 0 {
            self.expired.fetch_add(count as u64, Ordering::Relaxed);
            crate::metrics::record_cache_expired(self.kind, count);
        }
        count
    }

    /// Wipe this namespace from both tiers. Unlike [`invalidate`], the
    /// persisted removal is awaited: sign-out must not leave stale rows.
    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_prefix(self.kind.key_prefix()).await {
                warn!(kind = %self.kind, error = %e, "Persisted clear failed");
            }
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.kind.key_prefix(), key)
    }

    fn remove(&self, key: &str) {
        self.memory.remove(key);
        self.spawn_persist_delete(self.full_key(key));
    }

    fn spawn_persist_delete(&self, full_key: String) {
        if let Some(store) = &self.store {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.delete(&full_key).await {
                    debug!(key = %full_key, error = %e, "Persisted delete failed");
                }
            });
        }
    }

    /// LRU eviction: drop entries with the earliest `written_at` until the
    /// namespace fits its bound again.
    fn enforce_bound(&self) {
        while self.memory.len() > self.max_entries {
            let victim = self
                .memory
                .iter()
                .min_by_key(|r| r.value().written_at)
                .map(|r| r.key().clone());
            match victim {
                Some(key) => {
                    self.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_cache_eviction(self.kind);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_in_memory(&self, key: &str) -> bool {
        match self.memory.get_mut(key) {
            Some(mut entry) => {
                entry.checksum ^= 0xffff_ffff;
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn expire_in_memory(&self, key: &str) -> bool {
        match self.memory.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_in_memory(&self, key: &str, seconds: i64) -> bool {
        match self.memory.get_mut(key) {
            Some(mut entry) => {
                entry.written_at -= chrono::Duration::seconds(seconds);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}
