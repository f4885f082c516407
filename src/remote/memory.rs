//! In-memory [`RemoteStore`] with fault injection.
//!
//! Stands in for the real remote document store in tests and local
//! development. Supports the failure scenarios the engine has to survive:
//! going fully offline (every call fails with a network error, open
//! subscription streams break), and failing the next N transactions to
//! exercise retry and queue fallback paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{
    ChangeEvent, ChangeType, Document, QueryFilter, RemoteError, RemoteStore, TransactionWrite,
    WriteAction,
};

struct Subscriber {
    collection: String,
    filter: QueryFilter,
    sender: mpsc::Sender<ChangeEvent>,
}

pub struct MemoryRemote {
    /// collection -> doc_id -> body
    docs: Mutex<HashMap<String, HashMap<String, Value>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    offline: AtomicBool,
    fail_next: AtomicUsize,
    transactions: AtomicUsize,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
        }
    }

    /// Simulate losing / regaining connectivity. Going offline breaks every
    /// open subscription stream, as a dead connection would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.subscribers.lock().clear();
        }
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Fail the next `n` transactions with a network error, then recover.
    pub fn fail_next_transactions(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total transactions attempted (including failed ones).
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Direct read for assertions.
    #[must_use]
    pub fn document(&self, collection: &str, doc_id: &str) -> Option<Value> {
        self.docs.lock().get(collection)?.get(doc_id).cloned()
    }

    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.docs.lock().get(collection).map_or(0, HashMap::len)
    }

    /// Simulate a concurrent write from another device: stores the document
    /// and pushes the change to matching subscribers.
    pub fn remote_write(&self, collection: &str, doc_id: &str, data: Value) {
        let change = {
            let mut docs = self.docs.lock();
            let coll = docs.entry(collection.to_string()).or_default();
            let change = if coll.contains_key(doc_id) {
                ChangeType::Modified
            } else {
                ChangeType::Added
            };
            coll.insert(doc_id.to_string(), data.clone());
            change
        };
        self.publish(collection, ChangeEvent { doc_id: doc_id.to_string(), data, change });
    }

    /// Simulate a remote deletion from another device.
    pub fn remote_delete(&self, collection: &str, doc_id: &str) {
        let removed = {
            let mut docs = self.docs.lock();
            docs.get_mut(collection).and_then(|coll| coll.remove(doc_id))
        };
        if let Some(data) = removed {
            self.publish(
                collection,
                ChangeEvent { doc_id: doc_id.to_string(), data, change: ChangeType::Removed },
            );
        }
    }

    fn publish(&self, collection: &str, event: ChangeEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|sub| {
            if sub.collection != collection || !sub.filter.matches(&event.data) {
                return true;
            }
            // A closed receiver means the client unsubscribed; prune it.
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(collection, "Subscriber channel full, dropping event");
                    true
                }
            }
        });
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("simulated network outage".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn run_transaction(&self, write: TransactionWrite) -> Result<(), RemoteError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(RemoteError::Unavailable("injected transaction failure".into()));
        }

        let event = {
            let mut docs = self.docs.lock();
            let coll = docs.entry(write.collection.clone()).or_default();
            match write.action {
                WriteAction::Set(data) => {
                    let change = if coll.contains_key(&write.doc_id) {
                        ChangeType::Modified
                    } else {
                        ChangeType::Added
                    };
                    coll.insert(write.doc_id.clone(), data.clone());
                    Some(ChangeEvent { doc_id: write.doc_id.clone(), data, change })
                }
                WriteAction::Delete => coll.remove(&write.doc_id).map(|data| ChangeEvent {
                    doc_id: write.doc_id.clone(),
                    data,
                    change: ChangeType::Removed,
                }),
            }
        };

        if let Some(event) = event {
            self.publish(&write.collection, event);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &QueryFilter) -> Result<Vec<Document>, RemoteError> {
        self.check_online()?;
        let docs = self.docs.lock();
        let mut result: Vec<Document> = docs
            .get(collection)
            .map(|coll| {
                coll.iter()
                    .filter(|(_, data)| filter.matches(data))
                    .map(|(id, data)| Document { id: id.clone(), data: data.clone() })
                    .collect()
            })
            .unwrap_or_default();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: QueryFilter,
    ) -> Result<mpsc::Receiver<ChangeEvent>, RemoteError> {
        self.check_online()?;
        let (sender, receiver) = mpsc::channel(64);
        self.subscribers.lock().push(Subscriber {
            collection: collection.to_string(),
            filter,
            sender,
        });
        Ok(receiver)
    }

    async fn ping(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_transaction_set_and_query() {
        let remote = MemoryRemote::new();
        remote
            .run_transaction(TransactionWrite::set("streaks", "h1::u1", json!({"user_id": "u1"})))
            .await
            .unwrap();

        let docs = remote.query("streaks", &QueryFilter::for_user("u1")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "h1::u1");
    }

    #[tokio::test]
    async fn test_transaction_delete() {
        let remote = MemoryRemote::new();
        remote
            .run_transaction(TransactionWrite::set("streaks", "h1::u1", json!({})))
            .await
            .unwrap();
        remote.run_transaction(TransactionWrite::delete("streaks", "h1::u1")).await.unwrap();

        assert_eq!(remote.collection_len("streaks"), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_everything_with_network_error() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);

        let tx = remote
            .run_transaction(TransactionWrite::set("streaks", "x", json!({})))
            .await
            .unwrap_err();
        assert!(tx.is_network());
        assert!(remote.query("streaks", &QueryFilter::default()).await.is_err());
        assert!(!remote.ping().await);
    }

    #[tokio::test]
    async fn test_fail_next_transactions_then_recover() {
        let remote = MemoryRemote::new();
        remote.fail_next_transactions(2);

        let w = || TransactionWrite::set("streaks", "x", json!({}));
        assert!(remote.run_transaction(w()).await.is_err());
        assert!(remote.run_transaction(w()).await.is_err());
        assert!(remote.run_transaction(w()).await.is_ok());
        assert_eq!(remote.transaction_count(), 3);
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_changes() {
        let remote = MemoryRemote::new();
        let mut rx = remote.subscribe("streaks", QueryFilter::for_user("u1")).await.unwrap();

        remote.remote_write("streaks", "h1::u1", json!({"user_id": "u1", "n": 1}));
        remote.remote_write("streaks", "h1::u2", json!({"user_id": "u2", "n": 2}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.doc_id, "h1::u1");
        assert_eq!(event.change, ChangeType::Added);
        assert!(rx.try_recv().is_err(), "other user's change filtered out");
    }

    #[tokio::test]
    async fn test_modified_and_removed_change_types() {
        let remote = MemoryRemote::new();
        let mut rx = remote.subscribe("streaks", QueryFilter::default()).await.unwrap();

        remote.remote_write("streaks", "d1", json!({"v": 1}));
        remote.remote_write("streaks", "d1", json!({"v": 2}));
        remote.remote_delete("streaks", "d1");

        assert_eq!(rx.recv().await.unwrap().change, ChangeType::Added);
        assert_eq!(rx.recv().await.unwrap().change, ChangeType::Modified);
        assert_eq!(rx.recv().await.unwrap().change, ChangeType::Removed);
    }

    #[tokio::test]
    async fn test_going_offline_breaks_streams() {
        let remote = MemoryRemote::new();
        let mut rx = remote.subscribe("streaks", QueryFilter::default()).await.unwrap();

        remote.set_offline(true);

        assert!(rx.recv().await.is_none(), "stream closed by the outage");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let remote = MemoryRemote::new();
        let rx = remote.subscribe("streaks", QueryFilter::default()).await.unwrap();
        drop(rx);

        remote.remote_write("streaks", "d1", json!({}));
        assert_eq!(remote.subscribers.lock().len(), 0);
    }
}
