//! Per-request telemetry collector
//!
//! A [`Collector`] accumulates everything observed during one request under
//! the [`ResourceBudgets`] it was created with. All methods take `&self` and
//! are safe to call from any thread; state lives behind a single `RwLock`.
//!
//! Budget enforcement:
//! - each record kind has a count cap (`dropped[<kind>]` on rejection)
//! - every accepted record consumes an estimated number of bytes from the
//!   request byte budget (`dropped["payload"]` on rejection)
//! - strings longer than the string limit are cut (`dropped["strings"]`)
//!
//! Any rejection or cut marks the collector as truncated. Once a collector has
//! been completed it is sealed and later writes are ignored.
//!
//! No tracing events are emitted while the state lock is held: the request log
//! layer records into collectors and would otherwise re-enter the lock.

pub mod memory;
pub mod sql;
pub mod stack;

use crate::budgets::{
    Category, ResourceBudgets, DROP_LOG_CONTEXT, DROP_PAYLOAD, DROP_STRINGS,
    MAX_LOG_CONTEXT_FIELDS,
};
use crate::metadata::{
    duration_ms, now_unix_seconds, unix_seconds, CacheQuery, DatabaseQuery, FieldValue, LogEntry,
    Metadata, StackFrame, TimelineEvent, SCHEMA_VERSION,
};
use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

pub use stack::{BacktraceCapture, StackCapture, MAX_STACK_FRAMES};

const DB_BYTES_OVERHEAD: usize = 64;
const CACHE_BYTES_OVERHEAD: usize = 48;
const LOG_BYTES_OVERHEAD: usize = 96;
const LOG_FRAME_BYTES: usize = 64;
const TIMELINE_BYTES_OVERHEAD: usize = 32;

/// Optional attribution for a database query
#[derive(Debug, Clone, Copy, Default)]
pub struct QuerySource<'a> {
    /// Model or table name; extracted from the SQL text when empty
    pub model: &'a str,
    /// Source file; the calling location is used when empty
    pub file: &'a str,
    pub line: u32,
}

pub struct Collector {
    id: String,
    stack_capture: Option<Arc<dyn StackCapture>>,
    /// Exact key this collector was registered under in the trace registry
    registered_trace: OnceLock<String>,
    state: RwLock<CollectorState>,
}

struct CollectorState {
    budgets: ResourceBudgets,
    start_time: SystemTime,
    method: String,
    uri: String,
    url: String,
    controller: String,
    headers: BTreeMap<String, String>,
    trace_id: String,
    span_id: String,
    response_status: u16,
    response_time: Option<SystemTime>,
    response_duration: Duration,
    memory_start: u64,
    memory_end: u64,

    database_queries: Vec<DatabaseQuery>,
    cache_queries: Vec<CacheQuery>,
    log_entries: Vec<LogEntry>,
    timeline_events: Vec<TimelineEvent>,
    user_data: BTreeMap<String, FieldValue>,
    dropped: BTreeMap<String, u64>,
    truncated: bool,
    used_bytes: usize,
    sealed: bool,
}

impl Collector {
    /// Create a collector with a fresh id, stamped with the current time and
    /// process memory
    pub fn new(method: &str, uri: &str, budgets: ResourceBudgets) -> Self {
        let budgets = ResourceBudgets {
            max_string_length: budgets.string_limit(),
            ..budgets
        };

        Self {
            id: Uuid::new_v4().to_string(),
            stack_capture: Some(Arc::new(BacktraceCapture)),
            registered_trace: OnceLock::new(),
            state: RwLock::new(CollectorState {
                budgets,
                start_time: SystemTime::now(),
                method: method.to_string(),
                uri: uri.to_string(),
                url: String::new(),
                controller: String::new(),
                headers: BTreeMap::new(),
                trace_id: String::new(),
                span_id: String::new(),
                response_status: 0,
                response_time: None,
                response_duration: Duration::ZERO,
                memory_start: memory::process_memory(),
                memory_end: 0,
                database_queries: Vec::with_capacity(8),
                cache_queries: Vec::with_capacity(16),
                log_entries: Vec::with_capacity(16),
                timeline_events: Vec::with_capacity(16),
                user_data: BTreeMap::new(),
                dropped: BTreeMap::new(),
                truncated: false,
                used_bytes: 0,
                sealed: false,
            }),
        }
    }

    /// Replace the stack capture used for log entries recorded without frames
    ///
    /// `None` disables stack capture entirely.
    pub fn with_stack_capture(mut self, capture: Option<Arc<dyn StackCapture>>) -> Self {
        self.stack_capture = capture;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Trace id as currently stored (possibly truncated)
    pub fn trace_id(&self) -> String {
        self.read().trace_id.clone()
    }

    /// Registry key recorded by [`Collector::mark_registered`], untruncated
    pub fn registered_trace(&self) -> Option<&str> {
        self.registered_trace.get().map(String::as_str)
    }

    /// Remember the registry key; only the first call has an effect
    pub(crate) fn mark_registered(&self, trace_id: &str) -> bool {
        self.registered_trace.set(trace_id.to_string()).is_ok()
    }

    pub fn is_sealed(&self) -> bool {
        self.read().sealed
    }

    pub fn set_headers(&self, headers: BTreeMap<String, String>) {
        let mut state = self.write();
        if state.sealed {
            return;
        }
        let headers = headers
            .into_iter()
            .map(|(name, value)| {
                let value = state.truncate(&value);
                (name, value)
            })
            .collect();
        state.headers = headers;
    }

    pub fn set_url(&self, url: &str) {
        let mut state = self.write();
        if state.sealed {
            return;
        }
        state.url = state.truncate(url);
    }

    pub fn set_controller(&self, controller: &str) {
        let mut state = self.write();
        if state.sealed {
            return;
        }
        state.controller = state.truncate(controller);
    }

    pub fn set_trace(&self, trace_id: &str, span_id: &str) {
        let mut state = self.write();
        if state.sealed {
            return;
        }
        state.trace_id = state.truncate(trace_id);
        state.span_id = state.truncate(span_id);
    }

    /// Stamp the response and append the whole-request timeline entry
    pub fn set_response_data(&self, status: u16, duration: Duration) {
        let memory_end = memory::process_memory();
        let mut state = self.write();
        if state.sealed {
            return;
        }
        state.stamp_response(status, duration, memory_end);
    }

    #[track_caller]
    pub fn add_database_query(&self, query: &str, duration: Duration, connection: &str, slow: bool) {
        self.add_database_query_detailed(query, duration, connection, slow, QuerySource::default());
    }

    /// Record a query with explicit attribution
    ///
    /// An empty model is filled from the SQL text and an empty file from the
    /// calling location.
    #[track_caller]
    pub fn add_database_query_detailed(
        &self,
        query: &str,
        duration: Duration,
        connection: &str,
        slow: bool,
        source: QuerySource<'_>,
    ) {
        let caller = Location::caller();
        let mut state = self.write();
        if state.sealed {
            return;
        }

        let current = state.database_queries.len();
        if !state.reserve(Category::Database, current, query.len() + DB_BYTES_OVERHEAD) {
            return;
        }

        let model = if source.model.is_empty() {
            sql::extract_table_name(query)
        } else {
            source.model.to_string()
        };
        let (file, line) = if source.file.is_empty() {
            (caller.file(), caller.line())
        } else {
            (source.file, source.line)
        };

        let timestamp = now_unix_seconds();
        let record = DatabaseQuery {
            query: state.truncate(query),
            duration: duration_ms(duration),
            connection: state.truncate(connection),
            model: state.truncate(&model),
            file: state.truncate(file),
            line,
            slow,
            timestamp,
        };

        let description = record.query.clone();
        state.database_queries.push(record);
        let color = if slow { "red" } else { "blue" };
        state.append_timeline("db", &description, timestamp - duration.as_secs_f64(), timestamp, color);
    }

    pub fn add_cache_query(&self, cache_type: &str, key: &str, duration: Duration) {
        let mut state = self.write();
        if state.sealed {
            return;
        }

        let current = state.cache_queries.len();
        if !state.reserve(Category::Cache, current, key.len() + CACHE_BYTES_OVERHEAD) {
            return;
        }

        let timestamp = now_unix_seconds();
        let record = CacheQuery {
            kind: state.truncate(cache_type),
            key: state.truncate(key),
            duration: duration_ms(duration),
            timestamp,
        };

        let description = format!("{}: {}", record.kind, record.key);
        state.cache_queries.push(record);
        state.append_timeline("cache", &description, timestamp - duration.as_secs_f64(), timestamp, "purple");
    }

    pub fn add_log_entry(&self, level: &str, message: &str, fields: &[(&str, FieldValue)]) {
        self.add_log_entry_with_trace(level, message, fields, Vec::new());
    }

    /// Record a log entry with caller-supplied frames
    ///
    /// When `frames` is empty the current call stack is captured instead, if
    /// stack capture is enabled. Capture happens outside the state lock.
    pub fn add_log_entry_with_trace(
        &self,
        level: &str,
        message: &str,
        fields: &[(&str, FieldValue)],
        frames: Vec<StackFrame>,
    ) {
        // Stack capture resolves symbols and must stay outside the state lock
        let frames = match &self.stack_capture {
            Some(capture) if frames.is_empty() && !self.is_sealed() => {
                capture.capture(MAX_STACK_FRAMES)
            }
            _ => frames,
        };

        let mut state = self.write();
        if state.sealed {
            return;
        }

        let current = state.log_entries.len();
        let estimate = message.len() + LOG_BYTES_OVERHEAD + frames.len() * LOG_FRAME_BYTES;
        if !state.reserve(Category::Logs, current, estimate) {
            return;
        }

        let trace = state.sanitize_frames(frames);

        let entry = LogEntry {
            level: state.truncate(level),
            message: state.truncate(message),
            context: state.sanitize_context(fields),
            timestamp: now_unix_seconds(),
            trace,
        };
        state.log_entries.push(entry);
    }

    pub fn add_timeline_event(
        &self,
        name: &str,
        description: &str,
        start: SystemTime,
        end: SystemTime,
        color: &str,
    ) {
        let mut state = self.write();
        if state.sealed {
            return;
        }

        let current = state.timeline_events.len();
        let estimate = name.len() + description.len() + TIMELINE_BYTES_OVERHEAD;
        if !state.reserve(Category::Timeline, current, estimate) {
            return;
        }

        state.append_timeline(name, description, unix_seconds(start), unix_seconds(end), color);
    }

    /// Attach a custom value; an empty key is ignored, a repeated key overwrites
    pub fn set_user_data(&self, key: &str, value: impl Into<FieldValue>) {
        if key.is_empty() {
            return;
        }
        let value = value.into();
        let mut state = self.write();
        if state.sealed {
            return;
        }
        let value = state.sanitize_value(value);
        state.user_data.insert(key.to_string(), value);
    }

    /// Independent snapshot of everything collected so far
    pub fn metadata(&self) -> Metadata {
        let state = self.read();
        state.snapshot(&self.id)
    }

    /// Stamp the response, snapshot and seal in one critical section
    pub(crate) fn complete(&self, status: u16, duration: Duration) -> Metadata {
        let memory_end = memory::process_memory();
        let mut state = self.write();
        if !state.sealed {
            state.stamp_response(status, duration, memory_end);
            state.sealed = true;
        }
        state.snapshot(&self.id)
    }

    fn read(&self) -> RwLockReadGuard<'_, CollectorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CollectorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector").field("id", &self.id).finish_non_exhaustive()
    }
}

impl CollectorState {
    fn stamp_response(&mut self, status: u16, duration: Duration, memory_end: u64) {
        let now = SystemTime::now();
        self.response_status = status;
        self.response_time = Some(now);
        self.response_duration = duration;
        self.memory_end = memory_end;

        let description = format!("{} {}", self.method, self.uri);
        let start = unix_seconds(self.start_time);
        self.append_timeline("request", &description, start, unix_seconds(now), "green");
    }

    fn record_drop(&mut self, key: &str) {
        *self.dropped.entry(key.to_string()).or_insert(0) += 1;
        self.truncated = true;
    }

    /// Admit one record of `category` whose estimated size is `estimate`
    fn reserve(&mut self, category: Category, current: usize, estimate: usize) -> bool {
        let cap = self.budgets.cap(category);
        if cap > 0 && current >= cap {
            self.record_drop(category.as_str());
            return false;
        }

        let max_bytes = self.budgets.max_request_bytes;
        if max_bytes > 0 {
            let estimate = estimate.max(1);
            if self.used_bytes + estimate > max_bytes {
                self.record_drop(DROP_PAYLOAD);
                return false;
            }
            self.used_bytes += estimate;
        }

        true
    }

    /// Append a timeline entry, checking only the timeline count cap
    fn append_timeline(&mut self, name: &str, description: &str, start: f64, end: f64, color: &str) {
        let cap = self.budgets.max_timeline_events;
        if cap > 0 && self.timeline_events.len() >= cap {
            self.record_drop(Category::Timeline.as_str());
            return;
        }

        let (end, duration) = if end > start {
            (Some(end), Some((end - start) * 1000.0))
        } else {
            (None, None)
        };

        let event = TimelineEvent {
            name: self.truncate(name),
            description: self.truncate(description),
            start,
            end,
            duration,
            color: color.to_string(),
        };
        self.timeline_events.push(event);
    }

    /// Cut `value` to the string limit at a char boundary
    fn truncate(&mut self, value: &str) -> String {
        let max = self.budgets.max_string_length;
        if max == 0 || value.len() <= max {
            return value.to_string();
        }

        self.record_drop(DROP_STRINGS);
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value[..end].to_string()
    }

    fn sanitize_value(&mut self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Str(s) => FieldValue::Str(self.truncate(&s)),
            FieldValue::Other(s) => FieldValue::Other(self.truncate(s.trim())),
            other => other,
        }
    }

    fn sanitize_context(&mut self, fields: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        let mut out = BTreeMap::new();
        for (key, value) in fields {
            if out.len() >= MAX_LOG_CONTEXT_FIELDS {
                self.record_drop(DROP_LOG_CONTEXT);
                break;
            }
            let key = self.truncate(key);
            let value = self.sanitize_value(value.clone());
            out.insert(key, value);
        }
        out
    }

    fn sanitize_frames(&mut self, frames: Vec<StackFrame>) -> Vec<StackFrame> {
        frames
            .into_iter()
            .take(MAX_STACK_FRAMES)
            .map(|frame| StackFrame {
                call: self.truncate(&frame.call),
                file: self.truncate(&frame.file),
                line: frame.line,
                is_vendor: frame.is_vendor,
            })
            .collect()
    }

    fn snapshot(&self, id: &str) -> Metadata {
        Metadata {
            id: id.to_string(),
            version: SCHEMA_VERSION,
            kind: "request".to_string(),
            time: unix_seconds(self.start_time),
            response_time: self.response_time.map(unix_seconds).unwrap_or(0.0),
            response_status: self.response_status,
            response_duration: duration_ms(self.response_duration),
            method: self.method.clone(),
            uri: self.uri.clone(),
            url: self.url.clone(),
            controller: self.controller.clone(),
            headers: self.headers.clone(),
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            database_queries: self.database_queries.clone(),
            database_queries_count: self.database_queries.len(),
            database_duration: self.database_queries.iter().map(|q| q.duration).sum(),
            cache_queries: self.cache_queries.clone(),
            log_entries: self.log_entries.clone(),
            timeline_events: self.timeline_events.clone(),
            memory_usage: memory::memory_delta(self.memory_start, self.memory_end),
            truncated: self.truncated,
            dropped: self.dropped.clone(),
            user_data: self.user_data.clone(),
        }
    }
}
