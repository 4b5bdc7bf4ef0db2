use super::capture::{
    build_request_url, extract_safe_headers, should_capture, should_skip_path, trace_from_headers,
};
use super::PROTOCOL_VERSION_HEADER;
use crate::collector::Collector;
use crate::metadata::{duration_ms, FieldValue};
use crate::service::Profiler;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

/// Collector of the request being captured, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct RequestCollector(pub Arc<Collector>);

impl std::ops::Deref for RequestCollector {
    type Target = Collector;

    fn deref(&self) -> &Collector {
        &self.0
    }
}

/// Releases the request's trace registration when the request future is
/// dropped before completion (client disconnect, timeout)
struct TraceRegistration {
    profiler: Arc<Profiler>,
    collector: Arc<Collector>,
}

impl Drop for TraceRegistration {
    fn drop(&mut self) {
        self.profiler.release_trace(&self.collector);
    }
}

/// Request capture middleware
///
/// Use with `axum::middleware::from_fn_with_state(profiler, capture_middleware)`.
/// Requests carrying the activation header get a collector; when they finish
/// the record is completed and its id returned in the id response header.
pub async fn capture_middleware(
    State(profiler): State<Arc<Profiler>>,
    mut req: Request,
    next: Next,
) -> Response {
    let config = profiler.config();
    let id_header = HeaderName::from_bytes(config.id_header_name.as_bytes()).ok();

    if should_skip_path(req.uri().path()) {
        let mut response = next.run(req).await;
        if let Some(name) = &id_header {
            response.headers_mut().remove(name);
        }
        return response;
    }

    if !should_capture(req.headers(), &config.header_name) {
        return next.run(req).await;
    }

    let method = req.method().as_str().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let Some(collector) = profiler.new_collector(&method, &uri) else {
        return next.run(req).await;
    };

    collector.set_headers(extract_safe_headers(req.headers()));
    collector.set_url(&build_request_url(req.uri(), req.headers()));
    collector.add_log_entry(
        "info",
        "request capture enabled",
        &[("method", FieldValue::from(method.as_str())), ("uri", FieldValue::from(uri.as_str()))],
    );

    let (trace_id, span_id) = trace_from_headers(req.headers());
    collector.set_trace(&trace_id, &span_id);
    profiler.register_trace(&trace_id, &collector);
    let registration = TraceRegistration {
        profiler: Arc::clone(&profiler),
        collector: Arc::clone(&collector),
    };

    let matched_path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());
    req.extensions_mut().insert(RequestCollector(Arc::clone(&collector)));

    let start = Instant::now();
    let mut response = next.run(req).await;
    let duration = start.elapsed();

    if let Some(path) = matched_path {
        collector.set_controller(&path);
    }
    let status = response.status().as_u16();
    collector.add_log_entry(
        "info",
        "request completed",
        &[
            ("status", FieldValue::from(status)),
            ("duration_ms", FieldValue::from(duration_ms(duration))),
        ],
    );

    let metadata = profiler.complete_request(&collector, status, duration).await;
    drop(registration);
    tracing::debug!(
        request_id = %metadata.id,
        status,
        duration_ms = metadata.response_duration,
        "Request captured"
    );

    let headers = response.headers_mut();
    if let (Some(name), Ok(value)) = (id_header, HeaderValue::from_str(collector.id())) {
        headers.insert(name, value);
    }
    headers.insert(
        PROTOCOL_VERSION_HEADER,
        HeaderValue::from_static(super::PROTOCOL_VERSION),
    );

    response
}
