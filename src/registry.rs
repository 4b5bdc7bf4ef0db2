use crate::collector::Collector;
use crate::metadata::{FieldValue, StackFrame};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================
// Active trace registry
// ============================================================

/// Maps distributed-trace ids to the collector of the request carrying them
///
/// Used to route log events that arrive outside the request's own call path
/// (e.g. from the tracing layer) to the right collector. The first collector
/// registered under a trace id wins.
#[derive(Default)]
pub struct TraceRegistry {
    // Trace id -> collector (DashMap for low lock contention)
    active: DashMap<String, Arc<Collector>>,

    // Fast "anything active?" check for the log hot path
    active_count: AtomicUsize,
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `collector` under `trace_id`; empty ids and already-registered ids are ignored
    pub fn register(&self, trace_id: &str, collector: Arc<Collector>) {
        if trace_id.is_empty() {
            return;
        }
        if let Entry::Vacant(slot) = self.active.entry(trace_id.to_string()) {
            slot.insert(collector);
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Remove whatever is registered under `trace_id`
    pub fn unregister(&self, trace_id: &str) {
        if self.active.remove(trace_id).is_some() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Remove the mapping only if it still points at `collector`
    pub fn unregister_collector(&self, trace_id: &str, collector: &Collector) {
        if self
            .active
            .remove_if(trace_id, |_, registered| registered.id() == collector.id())
            .is_some()
        {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn has_active_traces(&self) -> bool {
        self.active_count() > 0
    }

    pub fn get(&self, trace_id: &str) -> Option<Arc<Collector>> {
        self.active.get(trace_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Record a log entry into the collector registered for `trace_id`
    ///
    /// Returns whether a collector was found.
    pub fn record_log_for_trace(
        &self,
        trace_id: &str,
        level: &str,
        message: &str,
        fields: &[(&str, FieldValue)],
        frames: Vec<StackFrame>,
    ) -> bool {
        if trace_id.is_empty() {
            return false;
        }
        // Clone out so the shard lock is released before recording
        let Some(collector) = self.get(trace_id) else {
            return false;
        };
        collector.add_log_entry_with_trace(level, message, fields, frames);
        true
    }

    /// Record a log entry when exactly one trace is active
    ///
    /// Best effort: with concurrent registrations the count and the map can
    /// briefly disagree, in which case nothing is recorded.
    pub fn record_log_for_single_active(
        &self,
        level: &str,
        message: &str,
        fields: &[(&str, FieldValue)],
        frames: Vec<StackFrame>,
    ) -> bool {
        if self.active_count() != 1 {
            return false;
        }
        let collector = self
            .active
            .iter()
            .next()
            .map(|entry| Arc::clone(entry.value()));
        let Some(collector) = collector else {
            return false;
        };
        collector.add_log_entry_with_trace(level, message, fields, frames);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budgets::ResourceBudgets;

    fn collector() -> Arc<Collector> {
        Arc::new(Collector::new("GET", "/", ResourceBudgets::default()).with_stack_capture(None))
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = TraceRegistry::new();
        assert!(!registry.has_active_traces());

        registry.register("t1", collector());
        registry.register("", collector());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.get("t1").is_some());

        registry.unregister("t1");
        registry.unregister("t1");
        assert_eq!(registry.active_count(), 0);
        assert!(registry.get("t1").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = TraceRegistry::new();
        let first = collector();
        let second = collector();
        registry.register("t1", Arc::clone(&first));
        registry.register("t1", Arc::clone(&second));

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.get("t1").unwrap().id(), first.id());

        // The loser completing must not evict the winner
        registry.unregister_collector("t1", &second);
        assert_eq!(registry.active_count(), 1);
        registry.unregister_collector("t1", &first);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_record_log_for_trace() {
        let registry = TraceRegistry::new();
        let c = collector();
        registry.register("t1", Arc::clone(&c));

        assert!(registry.record_log_for_trace("t1", "info", "hello", &[], Vec::new()));
        assert!(!registry.record_log_for_trace("t2", "info", "lost", &[], Vec::new()));
        assert!(!registry.record_log_for_trace("", "info", "lost", &[], Vec::new()));

        let meta = c.metadata();
        assert_eq!(meta.log_entries.len(), 1);
        assert_eq!(meta.log_entries[0].message, "hello");
    }

    #[test]
    fn test_record_log_for_single_active() {
        let registry = TraceRegistry::new();
        assert!(!registry.record_log_for_single_active("info", "none", &[], Vec::new()));

        let a = collector();
        registry.register("a", Arc::clone(&a));
        assert!(registry.record_log_for_single_active("info", "only one", &[], Vec::new()));
        assert_eq!(a.metadata().log_entries.len(), 1);

        let b = collector();
        registry.register("b", Arc::clone(&b));
        assert!(!registry.record_log_for_single_active("info", "ambiguous", &[], Vec::new()));
        assert_eq!(a.metadata().log_entries.len(), 1);
        assert!(b.metadata().log_entries.is_empty());
    }
}
