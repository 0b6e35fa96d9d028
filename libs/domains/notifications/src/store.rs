//! Key/bytes persistence backend used by the accumulator.

use crate::error::NotificationResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Simple key/bytes store. No transactions; a missing key is `Ok(None)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> NotificationResult<Option<Vec<u8>>>;

    async fn write(&self, key: &str, value: Vec<u8>) -> NotificationResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> NotificationResult<()>;

    /// All keys starting with `prefix`, in no particular order.
    async fn list_keys(&self, prefix: &str) -> NotificationResult<Vec<String>>;
}

/// In-memory store, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn read(&self, key: &str) -> NotificationResult<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> NotificationResult<()> {
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> NotificationResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> NotificationResult<Vec<String>> {
        let records = self.records.read().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
