use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Local key/value persistence behind the cache and the operation queue.
///
/// Keys are namespaced strings (`streak::h1::u1`, `queue::pending`, ...);
/// values are serialized JSON text. Implementations must make `put` atomic
/// per key: a reader never observes a partially written value.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every key starting with `prefix`. Returns the removed count.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// List `(key, value)` pairs under a prefix, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StorageError>;

    /// Wipe the store entirely.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Count keys under a prefix. Default implementation scans.
    async fn count_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        Ok(self.scan_prefix(prefix).await?.len() as u64)
    }
}
