//! Sync status broadcasting.
//!
//! All engine state changes funnel through [`StatusHub::update`], which
//! merges a partial patch into the current [`SyncStatus`] and notifies both
//! kinds of observers:
//!
//! - `watch` subscribers receive snapshots; a late subscriber immediately
//!   sees the current value, so "notify on subscribe with current state"
//!   comes for free.
//! - Registered callbacks run synchronously, in registration order. A
//!   panicking callback is caught and logged; the rest still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::domain::SyncStatus;

type StatusCallback = Box<dyn Fn(&SyncStatus) + Send + Sync>;

/// Partial update merged into the current status.
#[derive(Debug, Default, Clone)]
pub struct StatusPatch {
    pub is_online: Option<bool>,
    /// `Some(None)` clears the timestamp (sign-out), `Some(Some(_))` sets it.
    pub last_sync: Option<Option<DateTime<Utc>>>,
    pub pending_operations: Option<usize>,
    pub sync_in_progress: Option<bool>,
}

impl StatusPatch {
    #[must_use]
    pub fn online(value: bool) -> Self {
        Self { is_online: Some(value), ..Self::default() }
    }

    #[must_use]
    pub fn pending(count: usize) -> Self {
        Self { pending_operations: Some(count), ..Self::default() }
    }

    #[must_use]
    pub fn syncing(value: bool) -> Self {
        Self { sync_in_progress: Some(value), ..Self::default() }
    }

    #[must_use]
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self { last_sync: Some(Some(at)), ..Self::default() }
    }
}

struct Registry {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, StatusCallback)>>,
}

pub struct StatusHub {
    tx: watch::Sender<SyncStatus>,
    registry: Arc<Registry>,
}

impl StatusHub {
    #[must_use]
    pub fn new(initial: SyncStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Merge `patch` and notify observers if anything actually changed.
    pub fn update(&self, patch: StatusPatch) {
        let mut changed = false;
        self.tx.send_if_modified(|status| {
            if let Some(is_online) = patch.is_online {
                changed |= status.is_online != is_online;
                status.is_online = is_online;
            }
            if let Some(last_sync) = patch.last_sync {
                changed |= status.last_sync != last_sync;
                status.last_sync = last_sync;
            }
            if let Some(pending) = patch.pending_operations {
                changed |= status.pending_operations != pending;
                status.pending_operations = pending;
            }
            if let Some(syncing) = patch.sync_in_progress {
                changed |= status.sync_in_progress != syncing;
                status.sync_in_progress = syncing;
            }
            changed
        });

        if changed {
            let status = self.current();
            self.notify_callbacks(&status);
        }
    }

    /// Snapshot channel; the receiver immediately holds the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Register a callback, invoking it immediately with the current state.
    /// Dropping the returned handle unsubscribes.
    pub fn on_change(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: StatusCallback = Box::new(callback);

        let current = self.current();
        Self::invoke(&callback, &current);

        self.registry.callbacks.lock().push((id, callback));
        StatusSubscription { id, registry: Arc::clone(&self.registry) }
    }

    fn notify_callbacks(&self, status: &SyncStatus) {
        let callbacks = self.registry.callbacks.lock();
        for (_, callback) in callbacks.iter() {
            Self::invoke(callback, status);
        }
    }

    fn invoke(callback: &StatusCallback, status: &SyncStatus) {
        if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
            warn!("Status observer panicked; continuing with remaining observers");
        }
    }
}

/// Handle for a registered status callback. Unsubscribes on drop.
pub struct StatusSubscription {
    id: u64,
    registry: Arc<Registry>,
}

impl StatusSubscription {
    /// Explicit unsubscribe; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.registry.callbacks.lock().retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_update_merges_partial_patch() {
        let hub = StatusHub::new(SyncStatus::default());

        hub.update(StatusPatch::pending(3));
        let status = hub.current();
        assert_eq!(status.pending_operations, 3);
        assert!(status.is_online, "untouched fields keep their value");

        hub.update(StatusPatch::online(false));
        let status = hub.current();
        assert!(!status.is_online);
        assert_eq!(status.pending_operations, 3);
    }

    #[test]
    fn test_callback_invoked_immediately_with_current_state() {
        let hub = StatusHub::new(SyncStatus { pending_operations: 7, ..SyncStatus::default() });
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen_clone = seen.clone();

        let _sub = hub.on_change(move |status| {
            seen_clone.store(status.pending_operations, Ordering::SeqCst);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 7, "notified on subscribe");
    }

    #[test]
    fn test_callbacks_notified_in_registration_order() {
        let hub = StatusHub::new(SyncStatus::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = hub.on_change(move |_| o1.lock().push(1));
        let o2 = order.clone();
        let _s2 = hub.on_change(move |_| o2.lock().push(2));

        order.lock().clear(); // ignore the subscribe-time invocations
        hub.update(StatusPatch::online(false));

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_callback_does_not_break_the_loop() {
        let hub = StatusHub::new(SyncStatus::default());
        let reached = Arc::new(AtomicUsize::new(0));

        let _bad = hub.on_change(|status| {
            if !status.is_online {
                panic!("observer bug");
            }
        });
        let reached_clone = reached.clone();
        let _good = hub.on_change(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        reached.store(0, Ordering::SeqCst);
        hub.update(StatusPatch::online(false));

        assert_eq!(reached.load(Ordering::SeqCst), 1, "later observer still ran");
    }

    #[test]
    fn test_dropped_subscription_stops_notifications() {
        let hub = StatusHub::new(SyncStatus::default());
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let sub = hub.on_change(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        hub.update(StatusPatch::online(false));

        assert_eq!(count.load(Ordering::SeqCst), 1, "no notification after unsubscribe");
    }

    #[test]
    fn test_no_notification_when_nothing_changed() {
        let hub = StatusHub::new(SyncStatus::default());
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let _sub = hub.on_change(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count.store(0, Ordering::SeqCst);

        hub.update(StatusPatch::online(true)); // already online

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watch_subscriber_sees_current_then_updates() {
        let hub = StatusHub::new(SyncStatus::default());
        let mut rx = hub.subscribe();

        assert!(rx.borrow().is_online);

        hub.update(StatusPatch::online(false));
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_online);
    }
}
