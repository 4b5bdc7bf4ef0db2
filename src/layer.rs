//! Tracing layer routing application log events into request collectors
//!
//! Events carrying a `trace_id` field go to the collector registered for that
//! trace. Events without one go to the only active collector, if exactly one
//! request is being captured.

use crate::budgets::MAX_LOG_CONTEXT_FIELDS;
use crate::collector::stack::is_vendor_path;
use crate::metadata::{FieldValue, StackFrame};
use crate::service::Profiler;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Field used to correlate an event with a request
pub const TRACE_ID_FIELD: &str = "trace_id";

// Targets whose events describe the profiler or the HTTP stack itself
const INTERNAL_TARGETS: &[&str] = &[
    "reqscope::service",
    "reqscope::storage",
    "reqscope::http",
    "reqscope::commands",
    "tower_http",
];

pub struct RequestLogLayer {
    profiler: Arc<Profiler>,
}

impl RequestLogLayer {
    pub fn new(profiler: Arc<Profiler>) -> Self {
        Self { profiler }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    trace_id: Option<String>,
    fields: Vec<(String, FieldValue)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: FieldValue) {
        match field.name() {
            "message" => {
                let text = match value {
                    FieldValue::Str(s) | FieldValue::Other(s) => s,
                    other => format!("{:?}", other),
                };
                self.message = Some(text);
            }
            TRACE_ID_FIELD => {
                if let Some(id) = value.as_str() {
                    self.trace_id = Some(id.to_string());
                }
            }
            name => {
                // One spare slot so the collector still sees the overflow
                if self.fields.len() <= MAX_LOG_CONTEXT_FIELDS {
                    self.fields.push((name.to_string(), value));
                }
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        let rendered = rendered.trim_matches('"').to_string();
        self.push(field, FieldValue::Other(rendered));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, FieldValue::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, FieldValue::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, FieldValue::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, FieldValue::Bool(value));
    }
}

impl<S> Layer<S> for RequestLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.profiler.has_active_traces() {
            return;
        }

        let metadata = event.metadata();
        let target = metadata.target();
        if INTERNAL_TARGETS.iter().any(|prefix| target.starts_with(prefix)) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let level = metadata.level().to_string().to_lowercase();
        let message = visitor.message.unwrap_or_default();

        let mut fields: Vec<(&str, FieldValue)> = Vec::with_capacity(visitor.fields.len() + 1);
        fields.push(("target", FieldValue::from(target)));
        fields.extend(visitor.fields.iter().map(|(k, v)| (k.as_str(), v.clone())));

        let frames = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => vec![StackFrame {
                call: metadata.module_path().unwrap_or_default().to_string(),
                file: file.to_string(),
                line,
                is_vendor: is_vendor_path(file),
            }],
            _ => Vec::new(),
        };

        match visitor.trace_id.filter(|id| !id.is_empty()) {
            Some(trace_id) => {
                self.profiler
                    .record_log_for_trace(&trace_id, &level, &message, &fields, frames);
            }
            None => {
                self.profiler
                    .record_log_for_single_active(&level, &message, &fields, frames);
            }
        }
    }
}
