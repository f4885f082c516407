// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! [`SyncEngine`] ties the pieces together for one user session:
//! - [`TieredCache`] for offline reads and optimistic writes
//! - [`OperationQueue`] for mutations awaiting delivery
//! - a [`RemoteStore`] for transactional writes, queries, and change streams
//! - a [`ConnectivityProbe`] polled on a fixed interval
//! - a [`StatusHub`] broadcasting [`SyncStatus`] after every state change
//!
//! # Control flow
//!
//! ```text
//!            user mutation
//!                 │
//!                 ▼
//!        online? ──yes──► transactional write ──ok──► cache
//!            │                    │
//!            no                 fail
//!            │                    │
//!            ▼                    ▼
//!       cache optimistically + enqueue SyncOperation
//!                                 │
//!       connectivity poll ──► offline→online ──► drain queue (FIFO)
//!
//!       realtime change stream ──► conflict-resolve ──► cache
//! ```
//!
//! One engine instance per user session, built by the composition root and
//! injected wherever it is needed; there is no global instance.

mod api;
pub mod conflict;
pub mod connectivity;
mod realtime;
pub mod status;

pub use conflict::{pick_streak_winner, resolve_streak, Winner};
pub use connectivity::{ConnectivityProbe, ManualProbe, RemotePingProbe};
pub use status::{StatusHub, StatusPatch, StatusSubscription};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::TieredCache;
use crate::config::SyncConfig;
use crate::domain::{OpAction, SyncOperation, SyncStatus};
use crate::queue::{DrainReport, OperationExecutor, OperationQueue};
use crate::remote::{RemoteError, RemoteStore, TransactionWrite};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::{LocalStore, MemoryStore, SqliteStore, StorageError};

/// Storage key for the last successful full sync timestamp.
pub(crate) const LAST_SYNC_KEY: &str = "meta::last_sync";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),
}

/// Cache key for a streak mirror; doubles as the remote document id.
#[must_use]
pub(crate) fn streak_key(habit_id: &str, user_id: &str) -> String {
    format!("{habit_id}::{user_id}")
}

/// Patterns for the derived read models a habit mutation makes stale.
#[must_use]
pub(crate) fn derived_dependencies(habit_id: &str) -> Vec<String> {
    vec![format!("calendar::{habit_id}::*"), format!("analytics::{habit_id}::*")]
}

pub struct SyncEngine {
    config: SyncConfig,
    user_id: String,
    cache: Arc<TieredCache>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    probe: Arc<dyn ConnectivityProbe>,
    status: StatusHub,
    /// Guards overlapping full syncs; drains have their own guard in the queue.
    syncing: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build an engine for `user_id`, opening the configured local store and
    /// probing connectivity through the remote store itself.
    pub async fn connect(
        config: SyncConfig,
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Self>, SyncError> {
        let local: Arc<dyn LocalStore> = match &config.db_path {
            Some(path) => Arc::new(SqliteStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };
        let probe = Arc::new(RemotePingProbe::new(remote.clone()));
        Self::with_parts(config, user_id, remote, local, probe).await
    }

    /// Fully injected constructor for tests and unusual hosts.
    pub async fn with_parts(
        config: SyncConfig,
        user_id: impl Into<String>,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Arc<Self>, SyncError> {
        let user_id = user_id.into();
        let queue = Arc::new(OperationQueue::load(local.clone()).await);
        let cache = Arc::new(TieredCache::new(Some(local.clone())));

        let last_sync = match local.get(LAST_SYNC_KEY).await {
            Ok(Some(raw)) => raw.parse::<chrono::DateTime<chrono::Utc>>().ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read last-sync timestamp");
                None
            }
        };

        let status = StatusHub::new(SyncStatus {
            last_sync,
            pending_operations: queue.len().await,
            ..SyncStatus::default()
        });

        info!(user_id = %user_id, "Sync engine constructed");
        Ok(Arc::new(Self {
            config,
            user_id,
            cache,
            queue,
            remote,
            local,
            probe,
            status,
            syncing: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Start background work: connectivity polling, the cache expiry
    /// sweeper, and realtime subscriptions.
    pub async fn start(self: &Arc<Self>) {
        let sweeper = self
            .cache
            .spawn_sweeper(Duration::from_secs(self.config.sweep_interval_secs));
        self.tasks.lock().push(sweeper);

        let engine = Arc::clone(self);
        let monitor = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                engine.config.connectivity_interval_secs,
            ));
            loop {
                interval.tick().await;
                let online = engine.probe.check().await;
                engine.set_connectivity(online).await;
            }
        });
        self.tasks.lock().push(monitor);

        self.spawn_realtime().await;
        info!("Sync engine started");
    }

    /// Stop background work and unsubscribe every realtime stream. Must be
    /// called when the user session ends so listeners don't leak into the
    /// next session.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Sync engine shut down");
    }

    /// Current status snapshot.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.status.current()
    }

    /// Watch channel of status snapshots; the receiver immediately holds
    /// the current value.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Register a status callback (invoked immediately with current state).
    /// Dropping the handle unsubscribes.
    pub fn on_status_change(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        self.status.on_change(callback)
    }

    /// Cache diagnostics.
    #[must_use]
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Apply a connectivity observation. An offline→online transition
    /// re-establishes realtime subscriptions and immediately drains the
    /// pending queue.
    pub async fn set_connectivity(self: &Arc<Self>, online: bool) {
        let was_online = self.status.current().is_online;
        crate::metrics::set_online(online);
        self.status.update(StatusPatch::online(online));

        if online && !was_online {
            info!("Connectivity restored, draining pending operations");
            self.spawn_realtime().await;
            self.drain_pending().await;
        } else if !online && was_online {
            warn!("Connectivity lost, entering offline mode");
        }
    }

    /// Drain the operation queue against the remote store and refresh the
    /// pending counter. Safe to call at any time; overlapping calls no-op
    /// inside the queue.
    pub async fn drain_pending(&self) -> DrainReport {
        let executor = EngineExecutor { remote: self.remote.clone() };
        let report = self.queue.drain(&executor).await;
        self.status.update(StatusPatch::pending(self.queue.len().await));
        report
    }

    /// Direct access to the tiered cache (reads for diagnostics and views;
    /// mutations should normally go through the engine operations).
    #[must_use]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub(crate) async fn enqueue_fallback(&self, op: SyncOperation) {
        self.queue.enqueue(op).await;
        self.status.update(StatusPatch::pending(self.queue.len().await));
    }

    /// Flip offline if the error says the network is gone. Fail-safe: wrong
    /// guesses cost one poll interval, silently dropping updates costs data.
    pub(crate) fn note_remote_error(&self, error: &RemoteError) {
        if error.is_network() {
            crate::metrics::set_online(false);
            self.status.update(StatusPatch::online(false));
        }
    }
}

/// RAII guard for the full-sync flag.
pub(crate) struct SyncGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Queue executor backed by the real remote store. Each operation becomes
/// one transactional write, retried in-call with bounded backoff before the
/// failure counts against the operation's cross-session retry budget.
struct EngineExecutor {
    remote: Arc<dyn RemoteStore>,
}

#[async_trait]
impl OperationExecutor for EngineExecutor {
    async fn execute(&self, op: &SyncOperation) -> Result<(), RemoteError> {
        let doc_id = op.entity_id.clone().unwrap_or_else(|| op.id.clone());
        let write = match op.action {
            OpAction::Create | OpAction::Update => {
                TransactionWrite::set(op.entity.collection(), doc_id, op.payload.clone())
            }
            OpAction::Delete => TransactionWrite::delete(op.entity.collection(), doc_id),
        };
        retry("queued_operation", &RetryConfig::transaction(), || {
            self.remote.run_transaction(write.clone())
        })
        .await
    }
}
