use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure: the store could not be reached at all.
    #[error("Remote store unreachable: {0}")]
    Unavailable(String),
    /// The store was reached but the transaction was rejected or aborted.
    #[error("Transaction failed: {0}")]
    Transaction(String),
    /// A document could not be decoded into its domain type.
    #[error("Malformed document in '{collection}': {message}")]
    Decode { collection: String, message: String },
}

impl RemoteError {
    /// Whether this failure means connectivity is gone (as opposed to the
    /// operation itself being bad). Network-looking failures flip the engine
    /// into offline mode; others do not.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A document as the remote store hands it back.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Change kinds pushed over a realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One server-pushed change. Events for the same document arrive in
/// server-side write order; the client applies them as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub doc_id: String,
    pub data: Value,
    pub change: ChangeType,
}

/// Server-side filter for queries and subscriptions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub user_id: Option<String>,
    pub habit_id: Option<String>,
    /// Only documents whose `completed_on` is on or after this date.
    pub since: Option<NaiveDate>,
}

impl QueryFilter {
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_habit(mut self, habit_id: impl Into<String>) -> Self {
        self.habit_id = Some(habit_id.into());
        self
    }

    #[must_use]
    pub fn with_since(mut self, since: NaiveDate) -> Self {
        self.since = Some(since);
        self
    }

    /// Evaluate the filter against a document body.
    #[must_use]
    pub fn matches(&self, data: &Value) -> bool {
        if let Some(user_id) = &self.user_id {
            if data.get("user_id").and_then(Value::as_str) != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(habit_id) = &self.habit_id {
            if data.get("habit_id").and_then(Value::as_str) != Some(habit_id.as_str()) {
                return false;
            }
        }
        if let Some(since) = &self.since {
            let completed_on = data
                .get("completed_on")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<NaiveDate>().ok());
            match completed_on {
                Some(day) if day >= *since => {}
                _ => return false,
            }
        }
        true
    }
}

/// What a transaction does to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    Set(Value),
    Delete,
}

/// One atomic read-modify-write against the remote store. It either fully
/// applies or fully fails; there is no partial outcome to reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionWrite {
    pub collection: String,
    pub doc_id: String,
    pub action: WriteAction,
}

impl TransactionWrite {
    #[must_use]
    pub fn set(collection: impl Into<String>, doc_id: impl Into<String>, data: Value) -> Self {
        Self { collection: collection.into(), doc_id: doc_id.into(), action: WriteAction::Set(data) }
    }

    #[must_use]
    pub fn delete(collection: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self { collection: collection.into(), doc_id: doc_id.into(), action: WriteAction::Delete }
    }
}

/// The remote document store the engine synchronizes against.
///
/// Streak documents are keyed `habitId::userId`; completion documents by
/// completion id. Subscriptions deliver until the returned receiver is
/// dropped; dropping the receiver is the unsubscribe.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Execute one atomic transactional write.
    async fn run_transaction(&self, write: TransactionWrite) -> Result<(), RemoteError>;

    /// Fetch all documents in `collection` matching `filter`.
    async fn query(&self, collection: &str, filter: &QueryFilter) -> Result<Vec<Document>, RemoteError>;

    /// Open a realtime change stream for `collection` filtered by `filter`.
    async fn subscribe(
        &self,
        collection: &str,
        filter: QueryFilter,
    ) -> Result<mpsc::Receiver<ChangeEvent>, RemoteError>;

    /// Cheap reachability check for the connectivity monitor.
    async fn ping(&self) -> bool;
}
