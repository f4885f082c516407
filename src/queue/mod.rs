// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue of pending mutations.
//!
//! When a write cannot be confirmed against the remote store, it lands here
//! and is replayed by [`OperationQueue::drain`] once connectivity returns.
//! The queue is persisted as a single serialized list under one key, written
//! load-modify-store under the queue lock so a crash never leaves a partial
//! queue on disk.
//!
//! Delivery is best-effort, not guaranteed: an operation that fails three
//! drain passes is permanently dropped with a warning. A mutation that cannot
//! be applied after three attempts is more likely malformed than unlucky, and
//! retrying it forever would wedge the queue head.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::SyncOperation;
use crate::remote::RemoteError;
use crate::storage::LocalStore;

/// Drop ceiling: an operation failing this many drain passes is discarded.
pub const MAX_RETRIES: u32 = 3;

/// Storage key holding the serialized queue.
const QUEUE_KEY: &str = "queue::pending";

/// Executes one queued operation against the remote store.
///
/// The engine provides the real implementation (a transactional write);
/// tests substitute failure-injecting doubles.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, op: &SyncOperation) -> Result<(), RemoteError>;
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations executed and removed.
    pub executed: usize,
    /// Operations that failed and stay queued for the next pass.
    pub retried: usize,
    /// Operations permanently dropped at the retry ceiling.
    pub dropped: usize,
}

impl DrainReport {
    /// True when nothing failed or was dropped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.retried == 0 && self.dropped == 0
    }
}

pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    ops: Mutex<HashMap<String, SyncOperation>>,
    draining: AtomicBool,
    total_enqueued: AtomicU64,
    total_dropped: AtomicU64,
}

impl OperationQueue {
    /// Restore the queue from the local store (empty if nothing persisted).
    pub async fn load(store: Arc<dyn LocalStore>) -> Self {
        let ops = match store.get(QUEUE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<SyncOperation>>(&raw) {
                Ok(list) => {
                    if !list.is_empty() {
                        info!(pending = list.len(), "Restored pending operations from previous run");
                    }
                    list.into_iter().map(|op| (op.id.clone(), op)).collect()
                }
                Err(e) => {
                    // An unreadable queue is unrecoverable; better to start
                    // empty than to refuse startup.
                    error!(error = %e, "Persisted queue unreadable, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted queue, starting empty");
                HashMap::new()
            }
        };
        crate::metrics::set_queue_depth(ops.len());
        Self {
            store,
            ops: Mutex::new(ops),
            draining: AtomicBool::new(false),
            total_enqueued: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Append an operation and re-persist the full queue.
    ///
    /// Persistence failures are logged, not surfaced: the operation is still
    /// queued in memory and the user's optimistic write already succeeded.
    pub async fn enqueue(&self, op: SyncOperation) {
        let mut ops = self.ops.lock().await;
        debug!(id = %op.id, entity = ?op.entity, action = ?op.action, "Operation enqueued");
        ops.insert(op.id.clone(), op);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.persist_locked(&ops).await;
        crate::metrics::set_queue_depth(ops.len());
    }

    /// Number of pending operations.
    pub async fn len(&self) -> usize {
        self.ops.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ops.lock().await.is_empty()
    }

    /// Pending operations in FIFO (enqueue-time) order.
    pub async fn snapshot(&self) -> Vec<SyncOperation> {
        let ops = self.ops.lock().await;
        Self::fifo(&ops)
    }

    /// Execute all pending operations in FIFO order.
    ///
    /// Idempotent and re-entrant-safe: a second call while a drain is in
    /// flight returns an empty report immediately. Each operation gets one
    /// attempt per pass; failures increment its retry count and it is
    /// dropped for good once the count reaches [`MAX_RETRIES`].
    pub async fn drain(&self, executor: &dyn OperationExecutor) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Drain already in progress, skipping");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&self.draining);

        let pending = {
            let ops = self.ops.lock().await;
            Self::fifo(&ops)
        };
        if pending.is_empty() {
            return DrainReport::default();
        }

        let started = Instant::now();
        info!(pending = pending.len(), "Draining operation queue");
        let mut report = DrainReport::default();

        for op in pending {
            match executor.execute(&op).await {
                Ok(()) => {
                    let mut ops = self.ops.lock().await;
                    ops.remove(&op.id);
                    report.executed += 1;
                    crate::metrics::record_drain_outcome("executed");
                    debug!(id = %op.id, "Operation executed");
                }
                Err(e) => {
                    let mut ops = self.ops.lock().await;
                    // The entry may have been cleared while we were executing
                    if let Some(stored) = ops.get_mut(&op.id) {
                        stored.retry_count += 1;
                        stored.last_attempt_at = Some(Utc::now());
                        if stored.retry_count >= MAX_RETRIES {
                            warn!(
                                id = %op.id,
                                entity = ?op.entity,
                                action = ?op.action,
                                retries = stored.retry_count,
                                error = %e,
                                "Operation dropped after retry ceiling; this mutation is lost"
                            );
                            ops.remove(&op.id);
                            report.dropped += 1;
                            self.total_dropped.fetch_add(1, Ordering::Relaxed);
                            crate::metrics::record_drain_outcome("dropped");
                            crate::metrics::record_queue_dropped();
                        } else {
                            debug!(
                                id = %op.id,
                                retries = stored.retry_count,
                                error = %e,
                                "Operation failed, will retry next drain"
                            );
                            report.retried += 1;
                            crate::metrics::record_drain_outcome("retried");
                        }
                    }
                }
            }
        }

        let ops = self.ops.lock().await;
        self.persist_locked(&ops).await;
        crate::metrics::set_queue_depth(ops.len());
        crate::metrics::record_drain_duration(started.elapsed());
        info!(
            executed = report.executed,
            retried = report.retried,
            dropped = report.dropped,
            remaining = ops.len(),
            "Drain pass complete"
        );
        report
    }

    /// Discard every pending operation, memory and disk. Used on sign-out.
    pub async fn clear(&self) {
        let mut ops = self.ops.lock().await;
        ops.clear();
        if let Err(e) = self.store.delete(QUEUE_KEY).await {
            warn!(error = %e, "Failed to delete persisted queue");
        }
        crate::metrics::set_queue_depth(0);
    }

    /// Operations dropped at the retry ceiling since construction.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    /// Operations enqueued since construction (restored ones not counted).
    #[must_use]
    pub fn enqueued_count(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    fn fifo(ops: &HashMap<String, SyncOperation>) -> Vec<SyncOperation> {
        let mut list: Vec<SyncOperation> = ops.values().cloned().collect();
        list.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    async fn persist_locked(&self, ops: &HashMap<String, SyncOperation>) {
        let list = Self::fifo(ops);
        match serde_json::to_string(&list) {
            Ok(raw) => {
                if let Err(e) = self.store.put(QUEUE_KEY, &raw).await {
                    error!(error = %e, "Failed to persist operation queue");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize operation queue"),
        }
    }
}

/// RAII guard to reset the draining flag.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, OpAction};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn op(n: u32) -> SyncOperation {
        let mut op = SyncOperation::new(
            EntityKind::Completion,
            OpAction::Create,
            json!({"n": n}),
            "user-1",
            None,
        );
        // Deterministic FIFO order regardless of clock resolution
        op.enqueued_at = chrono::DateTime::from_timestamp(1_700_000_000 + i64::from(n), 0).unwrap();
        op
    }

    /// Executor that records execution order and fails ids in `fail`.
    struct RecordingExecutor {
        executed: Mutex<Vec<serde_json::Value>>,
        fail_all: AtomicBool,
        calls: AtomicUsize,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
                fail_all: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            let e = Self::new();
            e.fail_all.store(true, Ordering::SeqCst);
            e
        }
    }

    #[async_trait]
    impl OperationExecutor for RecordingExecutor {
        async fn execute(&self, op: &SyncOperation) -> Result<(), RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("injected".into()));
            }
            self.executed.lock().await.push(op.payload.clone());
            Ok(())
        }
    }

    async fn queue() -> (Arc<MemoryStore>, OperationQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = OperationQueue::load(store.clone() as Arc<dyn LocalStore>).await;
        (store, queue)
    }

    #[tokio::test]
    async fn test_enqueue_persists_full_queue() {
        let (store, queue) = queue().await;
        queue.enqueue(op(1)).await;
        queue.enqueue(op(2)).await;

        assert_eq!(queue.len().await, 2);
        let raw = store.get(QUEUE_KEY).await.unwrap().unwrap();
        let list: Vec<SyncOperation> = serde_json::from_str(&raw).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let queue = OperationQueue::load(store.clone() as Arc<dyn LocalStore>).await;
            queue.enqueue(op(1)).await;
            queue.enqueue(op(2)).await;
        }

        let queue = OperationQueue::load(store as Arc<dyn LocalStore>).await;
        assert_eq!(queue.len().await, 2);
        let ids: Vec<_> = queue.snapshot().await.iter().map(|o| o.payload["n"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_unreadable_persisted_queue_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.put(QUEUE_KEY, "not json at all").await.unwrap();

        let queue = OperationQueue::load(store as Arc<dyn LocalStore>).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_executes_in_enqueue_order() {
        let (_store, queue) = queue().await;
        // Insert out of numeric order; FIFO is by enqueued_at
        queue.enqueue(op(3)).await;
        queue.enqueue(op(1)).await;
        queue.enqueue(op(2)).await;

        let executor = RecordingExecutor::new();
        let report = queue.drain(&executor).await;

        assert_eq!(report.executed, 3);
        assert!(report.is_clean());
        assert!(queue.is_empty().await);
        let order = executor.executed.lock().await.clone();
        assert_eq!(order, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_is_noop() {
        let (_store, queue) = queue().await;
        let executor = RecordingExecutor::new();
        let report = queue.drain(&executor).await;
        assert_eq!(report, DrainReport::default());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_always_failing_op_retried_three_times_then_removed() {
        let (_store, queue) = queue().await;
        queue.enqueue(op(1)).await;
        let executor = RecordingExecutor::failing();

        let r1 = queue.drain(&executor).await;
        assert_eq!((r1.retried, r1.dropped), (1, 0));
        assert_eq!(queue.len().await, 1);

        let r2 = queue.drain(&executor).await;
        assert_eq!((r2.retried, r2.dropped), (1, 0));
        assert_eq!(queue.snapshot().await[0].retry_count, 2);

        let r3 = queue.drain(&executor).await;
        assert_eq!((r3.retried, r3.dropped), (0, 1));
        assert!(queue.is_empty().await, "dropped at the ceiling");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_op_with_incremented_retry_count() {
        let (_store, queue) = queue().await;
        queue.enqueue(op(1)).await;

        let executor = RecordingExecutor::failing();
        queue.drain(&executor).await;

        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].retry_count, 1);
        assert!(snapshot[0].last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_executes_the_rest() {
        struct FailSecond {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl OperationExecutor for FailSecond {
            async fn execute(&self, _op: &SyncOperation) -> Result<(), RemoteError> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 1 {
                    Err(RemoteError::Unavailable("flaky".into()))
                } else {
                    Ok(())
                }
            }
        }

        let (_store, queue) = queue().await;
        queue.enqueue(op(1)).await;
        queue.enqueue(op(2)).await;
        queue.enqueue(op(3)).await;

        let report = queue.drain(&FailSecond { calls: AtomicUsize::new(0) }).await;
        assert_eq!(report.executed, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(queue.len().await, 1, "only the failed op remains");
    }

    #[tokio::test]
    async fn test_clear_removes_memory_and_disk() {
        let (store, queue) = queue().await;
        queue.enqueue(op(1)).await;

        queue.clear().await;

        assert!(queue.is_empty().await);
        assert!(store.get(QUEUE_KEY).await.unwrap().is_none());
    }
}
