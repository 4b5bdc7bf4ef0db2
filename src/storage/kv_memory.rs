use super::indexed::KvBackend;
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// In-process [`KvBackend`] with per-key expiry
///
/// Expired keys are treated as absent and removed lazily on access.
#[derive(Default)]
pub struct MemoryKvBackend {
    values: DashMap<String, Expiring<Vec<u8>>>,
    lists: DashMap<String, Expiring<VecDeque<String>>>,
    // Artificial per-operation delay
    latency: Option<Duration>,
}

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A zero TTL means "no expiry"
fn deadline(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Instant::now().checked_add(ttl)
    }
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, e.g. to exercise timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn purge_expired_list(&self, key: &str) {
        let now = Instant::now();
        self.lists.remove_if(key, |_, list| list.is_expired(now));
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.simulate_latency().await;
        let now = Instant::now();
        if self.values.remove_if(key, |_, v| v.is_expired(now)).is_some() {
            return Ok(None);
        }
        Ok(self.values.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        self.simulate_latency().await;
        self.values.insert(key.to_string(), Expiring::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.simulate_latency().await;
        self.values.remove(key);
        self.lists.remove(key);
        Ok(())
    }

    async fn list_promote(&self, key: &str, member: &str) -> Result<(), StorageError> {
        self.simulate_latency().await;
        self.purge_expired_list(key);
        let mut list = self
            .lists
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(VecDeque::new(), Duration::ZERO));
        list.value.retain(|existing| existing != member);
        list.value.push_front(member.to_string());
        Ok(())
    }

    async fn list_trim(&self, key: &str, len: usize) -> Result<Vec<String>, StorageError> {
        self.simulate_latency().await;
        self.purge_expired_list(key);
        let Some(mut list) = self.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        if list.value.len() <= len {
            return Ok(Vec::new());
        }
        Ok(list.value.split_off(len).into_iter().collect())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StorageError> {
        self.simulate_latency().await;
        self.purge_expired_list(key);
        Ok(self
            .lists
            .get(key)
            .map(|list| list.value.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError> {
        self.simulate_latency().await;
        let expires_at = deadline(ttl);
        if let Some(mut value) = self.values.get_mut(key) {
            value.expires_at = expires_at;
        }
        if let Some(mut list) = self.lists.get_mut(key) {
            list.expires_at = expires_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_expire() {
        let kv = MemoryKvBackend::new();
        kv.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(20)).await.unwrap();
        kv.set_with_ttl("forever", b"v".to_vec(), Duration::ZERO).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.get("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_promote_trim_range() {
        let kv = MemoryKvBackend::new();
        for member in ["a", "b", "c", "a"] {
            kv.list_promote("idx", member).await.unwrap();
        }
        assert_eq!(kv.list_range("idx", 10).await.unwrap(), vec!["a", "c", "b"]);

        let removed = kv.list_trim("idx", 2).await.unwrap();
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(kv.list_range("idx", 1).await.unwrap(), vec!["a"]);
        assert!(kv.list_trim("missing", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_expire() {
        let kv = MemoryKvBackend::new();
        kv.list_promote("idx", "a").await.unwrap();
        kv.expire("idx", Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.list_range("idx", 10).await.unwrap().is_empty());
    }
}
