//! Persistence for finished request records
//!
//! Two implementations ship with the crate:
//! - [`InMemoryStorage`]: bounded by entry count and serialized bytes, evicting
//!   the least recently stored record first
//! - [`IndexedKvStorage`]: one key/value record per request plus a recency
//!   index list, over any [`KvBackend`]; [`MemoryKvBackend`] is the in-process
//!   backend

pub mod indexed;
pub mod kv_memory;
pub mod memory;

use crate::config::{ProfilerConfig, StorageKind};
use crate::error::StorageError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use indexed::{IndexedKvStorage, KvBackend};
pub use kv_memory::MemoryKvBackend;
pub use memory::InMemoryStorage;

/// Page size used by `list(0)` when the store has no cap of its own
pub const DEFAULT_LIST_LIMIT: usize = 50;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a record, replacing any record with the same id
    async fn store(&self, metadata: Arc<Metadata>) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Arc<Metadata>, StorageError>;

    /// Newest records first; `limit == 0` means the store's own cap
    async fn list(&self, limit: usize) -> Result<Vec<Arc<Metadata>>, StorageError>;

    /// Drop records older than `max_age`; a zero age is a no-op
    async fn cleanup(&self, max_age: Duration) -> Result<(), StorageError>;
}

/// Build the storage selected by `config.storage.kind`
pub fn build_storage(config: &ProfilerConfig) -> Arc<dyn Storage> {
    match config.storage.kind {
        StorageKind::Memory => Arc::new(InMemoryStorage::new(
            config.max_requests,
            config.max_storage_bytes,
        )),
        StorageKind::IndexedMemory => Arc::new(IndexedKvStorage::new(
            MemoryKvBackend::new(),
            &config.storage.key_prefix,
            config.max_requests,
            config.request_retention(),
            config.storage.operation_timeout(),
        )),
    }
}

pub(crate) fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.trim().is_empty() {
        return Err(StorageError::InvalidInput("metadata id is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_storage_by_kind() {
        for kind in [StorageKind::Memory, StorageKind::IndexedMemory] {
            let mut config = ProfilerConfig::default();
            config.storage.kind = kind;
            let storage = build_storage(&config);

            storage.store(Arc::new(Metadata::new("a"))).await.unwrap();
            assert_eq!(storage.get("a").await.unwrap().id, "a");
            assert!(matches!(storage.get("b").await, Err(StorageError::NotFound(_))));
        }
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("abc").is_ok());
        assert!(matches!(validate_id(" "), Err(StorageError::InvalidInput(_))));
    }
}
