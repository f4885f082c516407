//! # Habit Sync
//!
//! Offline-first synchronization and caching engine for habit-tracking
//! clients whose authoritative data lives in a remote document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UI / Domain Layer                       │
//! │  • recordCompletion / calculateStreak / useStreakFreeze     │
//! │  • observes SyncStatus                                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncEngine                           │
//! │  • Direct transactional writes when online                  │
//! │  • Optimistic cache + queue fallback when not               │
//! │  • Realtime change streams, conflict resolution             │
//! │  • Connectivity polling, status broadcasting                │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                      │
//!          ▼                                      ▼
//! ┌─────────────────────────┐      ┌─────────────────────────────┐
//! │       TieredCache       │      │       OperationQueue        │
//! │  • Memory + persisted   │      │  • Durable FIFO of pending  │
//! │  • Checksums, TTL, LRU  │      │    mutations                │
//! │  • Pattern invalidation │      │  • 3-strike drop ceiling    │
//! └─────────────────────────┘      └─────────────────────────────┘
//!          │                                      │
//!          └────────────────┬─────────────────────┘
//!                           ▼
//!              ┌─────────────────────────┐
//!              │   LocalStore (SQLite)   │
//!              │  • streak:: completion::│
//!              │    queue:: meta:: keys  │
//!              └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use habit_sync::{Completion, MemoryRemote, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         db_path: Some("habit_sync.db".into()),
//!         ..Default::default()
//!     };
//!     let remote = Arc::new(MemoryRemote::new()); // real deployments wire the store SDK here
//!
//!     let engine = SyncEngine::connect(config, "user-1", remote)
//!         .await
//!         .expect("Failed to open local store");
//!     engine.start().await;
//!
//!     // Works the same online and offline
//!     let today = chrono::Utc::now().date_naive();
//!     engine
//!         .record_completion(Completion::new("habit-1", "user-1", today))
//!         .await
//!         .expect("Completion payload must serialize");
//!
//!     let streak = engine.calculate_streak("habit-1", "user-1").await;
//!     println!("Current streak: {}", streak.current_streak);
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Guarantees (and non-guarantees)
//!
//! - Queued mutations replay in FIFO order on reconnect; they are dropped
//!   after three failed drain passes (best-effort delivery, by contract).
//! - Cache entries are checksum-verified on every read; corruption is
//!   treated as a miss, never served.
//! - Conflicts between devices resolve deterministically: later completion
//!   date wins, then higher streak.
//!
//! ## Modules
//!
//! - [`engine`]: the [`SyncEngine`] coordinator
//! - [`cache`]: checksum-verified tiered cache
//! - [`queue`]: durable pending-operation queue
//! - [`storage`]: local persistence backends
//! - [`remote`]: remote document store seam
//! - [`resilience`]: retry with exponential backoff
//! - [`metrics`]: metrics facade (`habit_sync_*`)

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod metrics;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod storage;

pub use cache::{CacheEntry, CacheStats, ChecksumCache, TieredCache};
pub use config::SyncConfig;
pub use domain::{
    CalendarMonth, Completion, DataKind, EntityKind, HabitAnalytics, HabitStreak, OpAction,
    StreakMilestone, SyncOperation, SyncStatus,
};
pub use engine::{
    pick_streak_winner, resolve_streak, ConnectivityProbe, ManualProbe, RemotePingProbe,
    StatusSubscription, SyncEngine, SyncError, Winner,
};
pub use queue::{DrainReport, OperationExecutor, OperationQueue, MAX_RETRIES};
pub use remote::{
    ChangeEvent, ChangeType, Document, MemoryRemote, QueryFilter, RemoteError, RemoteStore,
    TransactionWrite, WriteAction,
};
pub use resilience::retry::RetryConfig;
pub use storage::{LocalStore, MemoryStore, SqliteStore, StorageError};
