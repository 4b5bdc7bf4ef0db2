//! Service facade tying collectors, the trace registry and storage together

use crate::budgets::ResourceBudgets;
use crate::collector::{BacktraceCapture, Collector, StackCapture};
use crate::config::ProfilerConfig;
use crate::error::StorageError;
use crate::metadata::{FieldValue, Metadata, StackFrame};
use crate::registry::TraceRegistry;
use crate::storage::{build_storage, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Contributes custom data to a request right before it is snapshotted
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Typically calls [`Collector::set_user_data`]
    fn resolve(&self, collector: &Collector);
}

pub struct Profiler {
    config: ProfilerConfig,
    budgets: ResourceBudgets,
    storage: Option<Arc<dyn Storage>>,
    traces: TraceRegistry,
    data_sources: Vec<Arc<dyn DataSource>>,
    stack_capture: Option<Arc<dyn StackCapture>>,
}

impl Profiler {
    /// Create a profiler over an explicit storage (or none)
    pub fn new(mut config: ProfilerConfig, storage: Option<Arc<dyn Storage>>) -> Self {
        config.normalize();
        let budgets = ResourceBudgets::from_config(&config);
        let stack_capture: Option<Arc<dyn StackCapture>> = if config.capture_log_stacks {
            Some(Arc::new(BacktraceCapture))
        } else {
            None
        };

        Self {
            config,
            budgets,
            storage,
            traces: TraceRegistry::new(),
            data_sources: Vec::new(),
            stack_capture,
        }
    }

    /// Create a profiler with the storage selected in `config`
    pub fn from_config(config: ProfilerConfig) -> Self {
        let mut normalized = config;
        normalized.normalize();
        let storage = build_storage(&normalized);
        Self::new(normalized, Some(storage))
    }

    pub fn with_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data_sources.push(source);
        self
    }

    pub fn with_stack_capture(mut self, capture: Option<Arc<dyn StackCapture>>) -> Self {
        self.stack_capture = capture;
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn budgets(&self) -> ResourceBudgets {
        self.budgets
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn storage(&self) -> Option<&Arc<dyn Storage>> {
        self.storage.as_ref()
    }

    pub fn traces(&self) -> &TraceRegistry {
        &self.traces
    }

    /// New collector for a request, or `None` while the profiler is disabled
    pub fn new_collector(&self, method: &str, uri: &str) -> Option<Arc<Collector>> {
        if !self.is_enabled() {
            return None;
        }
        let collector = Collector::new(method, uri, self.budgets)
            .with_stack_capture(self.stack_capture.clone());
        Some(Arc::new(collector))
    }

    /// Map `trace_id` to `collector` and remember the exact key on the collector
    ///
    /// The key is kept untruncated so [`Profiler::release_trace`] removes the
    /// same entry regardless of the string limit applied to the record.
    pub fn register_trace(&self, trace_id: &str, collector: &Arc<Collector>) {
        if trace_id.is_empty() || !collector.mark_registered(trace_id) {
            return;
        }
        self.traces.register(trace_id, Arc::clone(collector));
    }

    /// Drop the registry entry owned by `collector`, if any
    ///
    /// Safe to call more than once and after completion; an entry that now
    /// maps to another collector is left alone.
    pub fn release_trace(&self, collector: &Collector) {
        if let Some(trace_id) = collector.registered_trace() {
            self.traces.unregister_collector(trace_id, collector);
        }
    }

    pub fn unregister_trace(&self, trace_id: &str) {
        self.traces.unregister(trace_id);
    }

    pub fn has_active_traces(&self) -> bool {
        self.traces.has_active_traces()
    }

    pub fn record_log_for_trace(
        &self,
        trace_id: &str,
        level: &str,
        message: &str,
        fields: &[(&str, FieldValue)],
        frames: Vec<StackFrame>,
    ) -> bool {
        self.traces.record_log_for_trace(trace_id, level, message, fields, frames)
    }

    pub fn record_log_for_single_active(
        &self,
        level: &str,
        message: &str,
        fields: &[(&str, FieldValue)],
        frames: Vec<StackFrame>,
    ) -> bool {
        self.traces.record_log_for_single_active(level, message, fields, frames)
    }

    /// Persist a finished record; a no-op without storage
    pub async fn save_metadata(&self, metadata: Arc<Metadata>) -> Result<(), StorageError> {
        match self.active_storage() {
            Some(storage) => storage.store(metadata).await,
            None => Ok(()),
        }
    }

    pub async fn get_metadata(&self, id: &str) -> Result<Arc<Metadata>, StorageError> {
        match self.active_storage() {
            Some(storage) => storage.get(id).await,
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    /// Newest records first; empty without storage
    pub async fn list_metadata(&self, limit: usize) -> Result<Vec<Arc<Metadata>>, StorageError> {
        match self.active_storage() {
            Some(storage) => storage.list(limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Apply the configured retention to storage
    pub async fn cleanup(&self) -> Result<(), StorageError> {
        match self.active_storage() {
            Some(storage) => storage.cleanup(self.config.request_retention()).await,
            None => Ok(()),
        }
    }

    /// Finish a request: resolve data sources, stamp the response, snapshot,
    /// seal the collector, drop its trace registration and persist the record
    ///
    /// Storage failures are logged, never returned.
    pub async fn complete_request(
        &self,
        collector: &Collector,
        status: u16,
        duration: Duration,
    ) -> Arc<Metadata> {
        for source in &self.data_sources {
            source.resolve(collector);
        }

        let metadata = Arc::new(collector.complete(status, duration));

        self.release_trace(collector);

        if let Err(e) = self.save_metadata(Arc::clone(&metadata)).await {
            tracing::warn!(
                request_id = %metadata.id,
                error = %e,
                "Failed to persist request metadata"
            );
        }

        metadata
    }

    fn active_storage(&self) -> Option<&Arc<dyn Storage>> {
        if self.is_enabled() {
            self.storage.as_ref()
        } else {
            None
        }
    }
}

/// Spawn the periodic retention sweep
///
/// Returns `None` when the profiler is disabled or the interval is zero.
pub fn spawn_cleanup_task(profiler: Arc<Profiler>) -> Option<tokio::task::JoinHandle<()>> {
    let interval = profiler.config().cleanup_interval();
    if interval.is_zero() || !profiler.is_enabled() {
        return None;
    }

    Some(tokio::spawn(async move {
        cleanup_loop(profiler, interval).await;
    }))
}

async fn cleanup_loop(profiler: Arc<Profiler>, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        match profiler.cleanup().await {
            Ok(()) => {
                tracing::debug!(
                    retention_seconds = profiler.config().request_retention_seconds,
                    "Request retention sweep completed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Request retention sweep failed");
            }
        }
    }
}
