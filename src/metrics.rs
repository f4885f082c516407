// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for habit-sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! application chooses the exporter (Prometheus, OTEL, or nothing at all).
//!
//! # Metric Naming Convention
//! - `habit_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: completion, streak, calendar, analytics
//! - `outcome`: executed, retried, dropped

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::domain::DataKind;

/// Record a cache hit for a data kind.
pub fn record_cache_hit(kind: DataKind) {
    counter!("habit_sync_cache_hits_total", "kind" => kind.to_string()).increment(1);
}

/// Record a cache miss for a data kind.
pub fn record_cache_miss(kind: DataKind) {
    counter!("habit_sync_cache_misses_total", "kind" => kind.to_string()).increment(1);
}

/// Record an LRU eviction.
pub fn record_cache_eviction(kind: DataKind) {
    counter!("habit_sync_cache_evictions_total", "kind" => kind.to_string()).increment(1);
}

/// Record entries removed by an expiry sweep.
pub fn record_cache_expired(kind: DataKind, count: usize) {
    counter!("habit_sync_cache_expired_total", "kind" => kind.to_string()).increment(count as u64);
}

/// Record a checksum failure. Corruption is silent toward callers, so this
/// counter is the only place it shows up.
pub fn record_cache_corruption(kind: DataKind) {
    counter!("habit_sync_cache_corruption_total", "kind" => kind.to_string()).increment(1);
}

/// Set the current pending-operation queue depth.
pub fn set_queue_depth(depth: usize) {
    gauge!("habit_sync_queue_depth").set(depth as f64);
}

/// Record the outcome of one operation during a drain pass.
pub fn record_drain_outcome(outcome: &str) {
    counter!("habit_sync_drain_operations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an operation permanently dropped at the retry ceiling.
pub fn record_queue_dropped() {
    counter!("habit_sync_queue_dropped_total").increment(1);
}

/// Record a drain pass duration.
pub fn record_drain_duration(duration: Duration) {
    histogram!("habit_sync_drain_seconds").record(duration.as_secs_f64());
}

/// Record a full resync duration.
pub fn record_resync_duration(duration: Duration) {
    histogram!("habit_sync_resync_seconds").record(duration.as_secs_f64());
}

/// Set the current connectivity state (1 = online, 0 = offline).
pub fn set_online(online: bool) {
    gauge!("habit_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a realtime change event applied to the cache.
pub fn record_realtime_event(collection: &str, change: &str) {
    counter!(
        "habit_sync_realtime_events_total",
        "collection" => collection.to_string(),
        "change" => change.to_string()
    )
    .increment(1);
}
