use super::{validate_id, Storage, DEFAULT_LIST_LIMIT};
use crate::error::StorageError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Minimal key/value surface needed by [`IndexedKvStorage`]
///
/// Shaped after what a networked cache offers: plain values with a TTL plus
/// one list type used as a recency index.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Put `member` at the head of the list, removing any earlier occurrence
    async fn list_promote(&self, key: &str, member: &str) -> Result<(), StorageError>;

    /// Keep the first `len` members and return the ones removed
    async fn list_trim(&self, key: &str, len: usize) -> Result<Vec<String>, StorageError>;

    /// Up to `limit` members from the head
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StorageError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError>;
}

/// Records as `<prefix>:request:<id>` plus a newest-first index at `<prefix>:requests`
///
/// Expiry is delegated to the backend TTL, so `cleanup` does nothing. Every
/// backend call is bounded by the operation timeout.
pub struct IndexedKvStorage<B> {
    backend: B,
    prefix: String,
    max_entries: usize,
    ttl: Duration,
    operation_timeout: Duration,
}

impl<B: KvBackend> IndexedKvStorage<B> {
    pub fn new(
        backend: B,
        prefix: &str,
        max_entries: usize,
        ttl: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            prefix: prefix.trim_end_matches(':').to_string(),
            max_entries,
            ttl,
            operation_timeout,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:request:{}", self.prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:requests", self.prefix)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StorageError>> + Send,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::BackendUnavailable(format!(
                "{} timed out after {:?}",
                operation, self.operation_timeout
            ))),
        }
    }

    async fn load(&self, id: &str) -> Result<Arc<Metadata>, StorageError> {
        let key = self.record_key(id);
        let bytes = self
            .call("get", self.backend.get(&key))
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let metadata: Metadata = serde_json::from_slice(&bytes)?;
        Ok(Arc::new(metadata))
    }
}

#[async_trait]
impl<B: KvBackend> Storage for IndexedKvStorage<B> {
    async fn store(&self, metadata: Arc<Metadata>) -> Result<(), StorageError> {
        validate_id(&metadata.id)?;
        let payload = serde_json::to_vec(metadata.as_ref())?;
        let index = self.index_key();

        self.call(
            "set",
            self.backend.set_with_ttl(&self.record_key(&metadata.id), payload, self.ttl),
        )
        .await?;
        self.call("promote", self.backend.list_promote(&index, &metadata.id))
            .await?;

        if self.max_entries > 0 {
            let evicted = self
                .call("trim", self.backend.list_trim(&index, self.max_entries))
                .await?;
            for id in evicted {
                if let Err(e) = self.call("delete", self.backend.delete(&self.record_key(&id))).await {
                    tracing::debug!(request_id = %id, error = %e, "Failed to delete evicted record");
                }
            }
        }

        self.call("expire", self.backend.expire(&index, self.ttl)).await
    }

    async fn get(&self, id: &str) -> Result<Arc<Metadata>, StorageError> {
        self.load(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Arc<Metadata>>, StorageError> {
        let limit = match (limit, self.max_entries) {
            (0, 0) => DEFAULT_LIST_LIMIT,
            (0, max) => max,
            (limit, _) => limit,
        };

        let ids = self
            .call("range", self.backend.list_range(&self.index_key(), limit))
            .await?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            // Expired or unreadable records are skipped
            if let Ok(metadata) = self.load(&id).await {
                out.push(metadata);
            }
        }
        Ok(out)
    }

    async fn cleanup(&self, _max_age: Duration) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldValue;
    use crate::storage::MemoryKvBackend;

    fn storage(max_entries: usize) -> IndexedKvStorage<MemoryKvBackend> {
        IndexedKvStorage::new(
            MemoryKvBackend::new(),
            "test:",
            max_entries,
            Duration::from_secs(60),
            Duration::from_millis(200),
        )
    }

    fn record(id: &str) -> Arc<Metadata> {
        Arc::new(Metadata::new(id))
    }

    #[tokio::test]
    async fn test_store_get_list() {
        let storage = storage(10);
        storage.store(record("a")).await.unwrap();
        storage.store(record("b")).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap().id, "a");
        let listed: Vec<_> = storage
            .list(0)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(listed, vec!["b", "a"]);
        assert!(matches!(storage.get("zzz").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_returns_equal_record() {
        let storage = storage(10);
        let mut metadata = Metadata::new("typed");
        metadata
            .user_data
            .insert("rendered".to_string(), FieldValue::debug(&vec![1, 2]));
        metadata.user_data.insert("count".to_string(), FieldValue::UInt(3));
        metadata.user_data.insert("huge".to_string(), FieldValue::from(u64::MAX));
        let metadata = Arc::new(metadata);

        storage.store(Arc::clone(&metadata)).await.unwrap();

        assert_eq!(storage.get("typed").await.unwrap(), metadata);
    }

    #[tokio::test]
    async fn test_keys_use_prefix() {
        let storage = storage(10);
        storage.store(record("a")).await.unwrap();

        assert!(storage.backend().get("test:request:a").await.unwrap().is_some());
        assert_eq!(
            storage.backend().list_range("test:requests", 10).await.unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_index_cap_deletes_evicted_records() {
        let storage = storage(2);
        for id in ["a", "b", "c"] {
            storage.store(record(id)).await.unwrap();
        }

        assert_eq!(storage.list(0).await.unwrap().len(), 2);
        assert!(storage.backend().get("test:request:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_does_not_duplicate_index() {
        let storage = storage(10);
        storage.store(record("a")).await.unwrap();
        storage.store(record("b")).await.unwrap();
        storage.store(record("a")).await.unwrap();

        let listed: Vec<_> = storage
            .list(10)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(listed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_records() {
        let storage = storage(10);
        storage.store(record("a")).await.unwrap();
        storage.store(record("b")).await.unwrap();
        storage
            .backend()
            .set_with_ttl("test:request:a", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        storage.backend().delete("test:request:b").await.unwrap();
        storage.store(record("c")).await.unwrap();

        let listed = storage.list(0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "c");
        assert!(matches!(
            storage.get("a").await,
            Err(StorageError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let storage = IndexedKvStorage::new(
            MemoryKvBackend::new().with_latency(Duration::from_millis(100)),
            "slow",
            10,
            Duration::from_secs(60),
            Duration::from_millis(10),
        );

        let result = storage.store(record("a")).await;
        assert!(matches!(result, Err(StorageError::BackendUnavailable(_))));
        let result = storage.list(0).await;
        assert!(matches!(result, Err(StorageError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let storage = storage(10);
        assert!(matches!(
            storage.store(record("")).await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_is_noop() {
        let storage = storage(10);
        storage.store(record("a")).await.unwrap();
        storage.cleanup(Duration::from_secs(1)).await.unwrap();
        assert!(storage.get("a").await.is_ok());
    }
}
