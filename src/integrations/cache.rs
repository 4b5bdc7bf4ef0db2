use crate::collector::Collector;
use std::future::Future;
use std::time::{Duration, Instant};

/// Records cache operations into the request collector
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheObserver;

impl CacheObserver {
    pub fn new() -> Self {
        Self
    }

    pub fn observe(&self, collector: Option<&Collector>, kind: &str, key: &str, duration: Duration) {
        if let Some(collector) = collector {
            collector.add_cache_query(kind, key, duration);
        }
    }

    /// Await `operation`, record its duration, and pass its output through
    pub async fn timed<F, T>(&self, collector: Option<&Collector>, kind: &str, key: &str, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let output = operation.await;
        self.observe(collector, kind, key, start.elapsed());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budgets::ResourceBudgets;

    #[tokio::test]
    async fn test_timed_records_operation() {
        let c = Collector::new("GET", "/", ResourceBudgets::default()).with_stack_capture(None);
        let observer = CacheObserver::new();

        let value = observer
            .timed(Some(&c), "get", "session:42", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some("cached")
            })
            .await;

        assert_eq!(value, Some("cached"));
        let meta = c.metadata();
        assert_eq!(meta.cache_queries.len(), 1);
        assert_eq!(meta.cache_queries[0].kind, "get");
        assert_eq!(meta.cache_queries[0].key, "session:42");
        assert!(meta.cache_queries[0].duration >= 5.0);
        assert_eq!(meta.timeline_events[0].description, "get: session:42");
    }

    #[tokio::test]
    async fn test_without_collector() {
        let observer = CacheObserver::new();
        let value = observer.timed(None, "set", "k", async { 7 }).await;
        assert_eq!(value, 7);
    }
}
