// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-level cache across all data kinds.
//!
//! [`TieredCache`] composes one [`ChecksumCache`] per [`DataKind`]: memory
//! tier for everything, persisted tier only for the kinds worth persisting
//! (streaks and completions; calendars and analytics are derived and cheap
//! to rebuild). On top of the per-kind stores it adds dependency
//! invalidation, cross-namespace pattern invalidation, a background expiry
//! sweeper, and aggregate hit/miss diagnostics.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{CalendarMonth, Completion, DataKind, HabitAnalytics, HabitStreak};
use crate::storage::LocalStore;
use super::typed::{CacheCounters, ChecksumCache};

/// Aggregate cache diagnostics across all kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub corruptions: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn absorb(&mut self, c: CacheCounters) {
        self.hits += c.hits;
        self.misses += c.misses;
        self.evictions += c.evictions;
        self.expired += c.expired;
        self.corruptions += c.corruptions;
    }
}

pub struct TieredCache {
    streaks: ChecksumCache<HabitStreak>,
    completions: ChecksumCache<Completion>,
    calendars: ChecksumCache<CalendarMonth>,
    analytics: ChecksumCache<HabitAnalytics>,
}

impl TieredCache {
    /// Build the cache over an optional persisted tier. Kinds that are not
    /// persist-worthy never see the store.
    #[must_use]
    pub fn new(store: Option<Arc<dyn LocalStore>>) -> Self {
        let for_kind = |kind: DataKind| -> Option<Arc<dyn LocalStore>> {
            if kind.persist_worthy() { store.clone() } else { None }
        };
        Self {
            streaks: ChecksumCache::new(DataKind::Streak, for_kind(DataKind::Streak)),
            completions: ChecksumCache::new(DataKind::Completion, for_kind(DataKind::Completion)),
            calendars: ChecksumCache::new(DataKind::Calendar, None),
            analytics: ChecksumCache::new(DataKind::Analytics, None),
        }
    }

    #[must_use]
    pub fn streaks(&self) -> &ChecksumCache<HabitStreak> {
        &self.streaks
    }

    #[must_use]
    pub fn completions(&self) -> &ChecksumCache<Completion> {
        &self.completions
    }

    #[must_use]
    pub fn calendars(&self) -> &ChecksumCache<CalendarMonth> {
        &self.calendars
    }

    #[must_use]
    pub fn analytics(&self) -> &ChecksumCache<HabitAnalytics> {
        &self.analytics
    }

    /// Cache a streak and invalidate everything derived from it.
    ///
    /// `dependencies` are namespaced keys or single-`*` patterns, e.g.
    /// `analytics::h1::*`: a streak update makes derived analytics stale.
    pub async fn put_streak(&self, key: &str, value: HabitStreak, dependencies: &[String]) {
        self.streaks.set(key, value).await;
        self.invalidate_dependencies(dependencies);
    }

    /// Cache a completion and invalidate everything derived from it.
    pub async fn put_completion(&self, key: &str, value: Completion, dependencies: &[String]) {
        self.completions.set(key, value).await;
        self.invalidate_dependencies(dependencies);
    }

    fn invalidate_dependencies(&self, dependencies: &[String]) {
        for dep in dependencies {
            self.invalidate_pattern(dep);
        }
    }

    /// Invalidate a namespaced key or pattern.
    ///
    /// `streak::h1::*` targets one namespace; a pattern without a recognized
    /// namespace prefix is applied to every kind.
    pub fn invalidate_pattern(&self, pattern: &str) {
        let mut routed = false;
        for kind in [DataKind::Streak, DataKind::Completion, DataKind::Calendar, DataKind::Analytics] {
            if let Some(bare) = pattern.strip_prefix(kind.key_prefix()) {
                match kind {
                    DataKind::Streak => self.streaks.invalidate_matching(bare),
                    DataKind::Completion => self.completions.invalidate_matching(bare),
                    DataKind::Calendar => self.calendars.invalidate_matching(bare),
                    DataKind::Analytics => self.analytics.invalidate_matching(bare),
                }
                routed = true;
            }
        }
        if !routed {
            self.streaks.invalidate_matching(pattern);
            self.completions.invalidate_matching(pattern);
            self.calendars.invalidate_matching(pattern);
            self.analytics.invalidate_matching(pattern);
        }
        debug!(pattern, routed, "Cache invalidation");
    }

    /// One expiry sweep over every kind. Returns total removed.
    pub fn sweep(&self) -> usize {
        self.streaks.sweep_expired()
            + self.completions.sweep_expired()
            + self.calendars.sweep_expired()
            + self.analytics.sweep_expired()
    }

    /// Spawn the background sweep task. The caller owns the handle and
    /// aborts it on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a fresh engine
            // doesn't sweep an empty cache.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "Expiry sweep");
                }
            }
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        stats.absorb(self.streaks.counters());
        stats.absorb(self.completions.counters());
        stats.absorb(self.calendars.counters());
        stats.absorb(self.analytics.counters());
        stats
    }

    /// Total entries currently in the memory tier, all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streaks.len() + self.completions.len() + self.calendars.len() + self.analytics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipe every namespace from both tiers. Used on sign-out.
    pub async fn clear_all(&self) {
        self.streaks.clear().await;
        self.completions.clear().await;
        self.calendars.clear().await;
        self.analytics.clear().await;
        info!("Cache cleared (all namespaces)");
    }
}
