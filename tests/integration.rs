//! Integration tests for the sync engine.
//!
//! End-to-end scenarios driven through the public API, with the in-memory
//! remote store standing in for the real document store (it supports the
//! same failure injection the engine must survive) and tempfile-backed
//! SQLite for everything durability-related.
//!
//! # Test Organization
//! - `offline_*`  - offline capture, reconnect, drain
//! - `conflict_*` - cross-device conflict resolution
//! - `durable_*`  - persistence across engine restarts
//! - `signout_*`  - cache/queue wipe on sign-out

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tempfile::TempDir;

use habit_sync::{
    Completion, HabitStreak, LocalStore, ManualProbe, MemoryRemote, RemoteStore, SqliteStore,
    SyncConfig, SyncEngine,
};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

async fn engine_in_memory(remote: Arc<MemoryRemote>) -> Arc<SyncEngine> {
    SyncEngine::with_parts(
        SyncConfig::default(),
        "user-1",
        remote.clone() as Arc<dyn RemoteStore>,
        Arc::new(habit_sync::MemoryStore::new()),
        Arc::new(ManualProbe::new(true)),
    )
    .await
    .expect("engine construction")
}

async fn engine_with_sqlite(remote: Arc<MemoryRemote>, dir: &TempDir) -> Arc<SyncEngine> {
    let path = dir.path().join("sync.db");
    let local = SqliteStore::open(path.to_str().unwrap()).await.expect("sqlite open");
    SyncEngine::with_parts(
        SyncConfig::default(),
        "user-1",
        remote.clone() as Arc<dyn RemoteStore>,
        Arc::new(local),
        Arc::new(ManualProbe::new(true)),
    )
    .await
    .expect("engine construction")
}

// =============================================================================
// Offline capture and reconnect
// =============================================================================

#[tokio::test]
async fn offline_completions_queue_and_drain_on_reconnect() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_in_memory(remote.clone()).await;

    // Go offline, record three completions for the same habit
    remote.set_offline(true);
    engine.set_connectivity(false).await;
    let mut recorded_ids = Vec::new();
    for day in ["2024-01-13", "2024-01-14", "2024-01-15"] {
        let completion = Completion::new("habit-1", "user-1", d(day));
        recorded_ids.push(completion.id.clone());
        engine
            .record_completion(completion)
            .await
            .expect("offline record must succeed");
    }

    // All three are visible optimistically, queued, and counted
    let status = engine.sync_status();
    assert!(!status.is_online);
    assert_eq!(status.pending_operations, 3);
    for id in &recorded_ids {
        assert!(
            engine.cache().completions().get(id).await.is_some(),
            "optimistic write visible before confirmation"
        );
    }
    assert_eq!(remote.collection_len("completions"), 0, "nothing reached the store yet");

    // Reconnect: the transition drains the queue in FIFO order
    remote.set_offline(false);
    engine.set_connectivity(true).await;

    let status = engine.sync_status();
    assert!(status.is_online);
    assert_eq!(status.pending_operations, 0);
    assert_eq!(remote.collection_len("completions"), 3, "all three replayed");
}

#[tokio::test]
async fn offline_streak_read_serves_cached_mirror() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_in_memory(remote.clone()).await;

    // Online read computes from remote history and caches
    let today = Utc::now().date_naive();
    let completion = Completion::new("habit-1", "user-1", today);
    remote.remote_write(
        "completions",
        &completion.id.clone(),
        serde_json::to_value(&completion).unwrap(),
    );
    let online_streak = engine.calculate_streak("habit-1", "user-1").await;
    assert_eq!(online_streak.current_streak, 1);

    // Offline read returns the same value from the mirror
    remote.set_offline(true);
    engine.set_connectivity(false).await;
    let offline_streak = engine.calculate_streak("habit-1", "user-1").await;
    assert_eq!(offline_streak, online_streak);
}

#[tokio::test]
async fn offline_operation_dropped_after_three_failed_drains() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_in_memory(remote.clone()).await;

    remote.set_offline(true);
    engine.set_connectivity(false).await;
    engine
        .record_completion(Completion::new("habit-1", "user-1", d("2024-01-15")))
        .await
        .unwrap();
    assert_eq!(engine.sync_status().pending_operations, 1);

    // Three drain passes against a dead store: retry, retry, drop.
    // This is the documented data-loss boundary, not a crash.
    for expected_remaining in [1usize, 1, 0] {
        engine.drain_pending().await;
        assert_eq!(engine.sync_status().pending_operations, expected_remaining);
    }

    // The store never saw the mutation and the queue is done with it
    assert_eq!(remote.collection_len("completions"), 0);
    engine.drain_pending().await;
    assert_eq!(engine.sync_status().pending_operations, 0);
}

#[tokio::test]
async fn status_observers_follow_the_whole_offline_cycle() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_in_memory(remote.clone()).await;

    let mut rx = engine.subscribe_status();
    assert!(rx.borrow().is_online, "subscriber sees current state immediately");

    remote.set_offline(true);
    engine.set_connectivity(false).await;
    rx.changed().await.unwrap();
    assert!(!rx.borrow().is_online);

    engine
        .record_completion(Completion::new("habit-1", "user-1", d("2024-01-15")))
        .await
        .unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().pending_operations, 1);

    remote.set_offline(false);
    engine.set_connectivity(true).await;
    rx.changed().await.unwrap();
    let status = rx.borrow().clone();
    assert!(status.is_online);
    assert_eq!(status.pending_operations, 0);
}

// =============================================================================
// Conflict resolution across devices
// =============================================================================

#[tokio::test]
async fn conflict_vectors_from_both_directions() {
    // Later date wins
    let local = HabitStreak {
        current_streak: 5,
        last_completion_date: Some(d("2024-01-10")),
        ..HabitStreak::empty("h1", "u1")
    };
    let remote_streak = HabitStreak {
        current_streak: 3,
        last_completion_date: Some(d("2024-01-12")),
        ..HabitStreak::empty("h1", "u1")
    };
    assert_eq!(habit_sync::resolve_streak(&local, &remote_streak), remote_streak);

    // Equal dates: higher streak wins
    let local = HabitStreak {
        current_streak: 5,
        last_completion_date: Some(d("2024-01-12")),
        ..HabitStreak::empty("h1", "u1")
    };
    let remote_streak = HabitStreak {
        current_streak: 7,
        last_completion_date: Some(d("2024-01-12")),
        ..HabitStreak::empty("h1", "u1")
    };
    assert_eq!(habit_sync::resolve_streak(&local, &remote_streak).current_streak, 7);
}

#[tokio::test]
async fn conflict_realtime_change_does_not_erase_newer_local_progress() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_in_memory(remote.clone()).await;
    engine.start().await;

    // Seed the local mirror through the public API: a completion today
    let today = Utc::now().date_naive();
    let completion = Completion::new("habit-1", "user-1", today);
    remote.remote_write(
        "completions",
        &completion.id.clone(),
        serde_json::to_value(&completion).unwrap(),
    );
    let local = engine.calculate_streak("habit-1", "user-1").await;
    assert_eq!(local.current_streak, 1);

    // A stale device pushes an older streak document
    remote.remote_write(
        "streaks",
        "habit-1::user-1",
        json!({
            "habit_id": "habit-1",
            "user_id": "user-1",
            "current_streak": 0,
            "best_streak": 0,
            "last_completion_date": "2023-12-01",
            "freezes_available": 0,
            "freezes_used": 0,
            "milestones": []
        }),
    );

    // Give the realtime task a moment, then check the mirror survived
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let resolved = engine.calculate_streak("habit-1", "user-1").await;
    assert_eq!(resolved.current_streak, 1, "stale remote streak must not win");

    engine.shutdown().await;
}

// =============================================================================
// Durability across restarts
// =============================================================================

#[tokio::test]
async fn durable_queue_and_cache_survive_engine_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemote::new());

    // First session: capture offline work, then drop the engine
    {
        let engine = engine_with_sqlite(remote.clone(), &dir).await;
        remote.set_offline(true);
        engine.set_connectivity(false).await;
        engine
            .record_completion(Completion::new("habit-1", "user-1", d("2024-01-15")))
            .await
            .unwrap();
        assert_eq!(engine.sync_status().pending_operations, 1);
        engine.shutdown().await;
    }

    // Second session over the same database
    remote.set_offline(false);
    let engine = engine_with_sqlite(remote.clone(), &dir).await;
    assert_eq!(
        engine.sync_status().pending_operations,
        1,
        "queued operation restored from disk"
    );

    engine.set_connectivity(true).await;
    assert_eq!(engine.sync_status().pending_operations, 0);
    assert_eq!(remote.collection_len("completions"), 1, "restored operation replayed");
}

#[tokio::test]
async fn durable_corrupted_cache_row_is_discarded_not_served() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.db");
    let remote = Arc::new(MemoryRemote::new());

    // Write a streak through a first engine
    {
        let local = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        let local: Arc<dyn LocalStore> = Arc::new(local);
        let engine = SyncEngine::with_parts(
            SyncConfig::default(),
            "user-1",
            remote.clone() as Arc<dyn RemoteStore>,
            local.clone(),
            Arc::new(ManualProbe::new(true)),
        )
        .await
        .unwrap();

        let today = Utc::now().date_naive();
        let completion = Completion::new("habit-1", "user-1", today);
        remote.remote_write(
            "completions",
            &completion.id.clone(),
            serde_json::to_value(&completion).unwrap(),
        );
        engine.calculate_streak("habit-1", "user-1").await;

        // Corrupt the persisted row behind the engine's back
        let key = "streak::habit-1::user-1";
        let raw = local.get(key).await.unwrap().expect("row persisted");
        let damaged = raw.replace("\"current_streak\":1", "\"current_streak\":41");
        assert_ne!(raw, damaged, "corruption must actually change the row");
        local.put(key, &damaged).await.unwrap();
    }

    // A fresh engine must reject the damaged row and fall back to recompute
    let local = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
    let engine = SyncEngine::with_parts(
        SyncConfig::default(),
        "user-1",
        remote.clone() as Arc<dyn RemoteStore>,
        Arc::new(local),
        Arc::new(ManualProbe::new(true)),
    )
    .await
    .unwrap();

    let streak = engine.calculate_streak("habit-1", "user-1").await;
    assert_eq!(streak.current_streak, 1, "recomputed from history, not the corrupt row");
    assert_eq!(engine.cache_stats().corruptions, 1);
}

// =============================================================================
// Sign-out
// =============================================================================

#[tokio::test]
async fn signout_clears_all_namespaces_and_the_queue() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.db");
    let remote = Arc::new(MemoryRemote::new());

    let local = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
    let local: Arc<dyn LocalStore> = Arc::new(local);
    let engine = SyncEngine::with_parts(
        SyncConfig::default(),
        "user-1",
        remote.clone() as Arc<dyn RemoteStore>,
        local.clone(),
        Arc::new(ManualProbe::new(true)),
    )
    .await
    .unwrap();

    // Populate all four namespaces: streaks, completions, queue, last-sync
    let today = Utc::now().date_naive();
    let completion = Completion::new("habit-1", "user-1", today);
    remote.remote_write(
        "completions",
        &completion.id.clone(),
        serde_json::to_value(&completion).unwrap(),
    );
    engine.full_resync().await;
    engine.calculate_streak("habit-1", "user-1").await;
    remote.set_offline(true);
    engine.set_connectivity(false).await;
    engine
        .record_completion(Completion::new("habit-1", "user-1", d("2024-01-15")))
        .await
        .unwrap();

    assert!(engine.sync_status().last_sync.is_some());
    assert_eq!(engine.sync_status().pending_operations, 1);

    engine.clear_cache().await;

    let status = engine.sync_status();
    assert_eq!(status.pending_operations, 0);
    assert!(status.last_sync.is_none());
    for prefix in ["streak::", "completion::", "queue::", "meta::"] {
        assert_eq!(
            local.count_prefix(prefix).await.unwrap(),
            0,
            "namespace {prefix} must be empty after sign-out"
        );
    }
}
