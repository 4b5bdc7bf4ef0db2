//! Framework-neutral helpers deciding what to capture from an HTTP request

use axum::http::{HeaderMap, Uri};
use std::collections::BTreeMap;

/// Path prefix of the inspection routes
pub const INSPECTION_PREFIX: &str = "/__reqscope";

/// Request headers copied into the record; everything else may be sensitive
pub const SAFE_HEADERS: &[&str] = &[
    "Content-Type",
    "Accept",
    "User-Agent",
    "Accept-Language",
    "Accept-Encoding",
    "X-Request-ID",
    "X-City-ID",
    "X-Stage",
    "X-App-Version",
    "Origin",
    "Referer",
];

/// Favicon fetches and the inspection routes themselves are never captured
pub fn should_skip_path(path: &str) -> bool {
    let path = path.trim();
    let path = path.strip_suffix('/').unwrap_or(path);
    let path = if path.is_empty() { "/" } else { path };

    if path.to_ascii_lowercase().ends_with("/favicon.ico") {
        return true;
    }
    path.starts_with(INSPECTION_PREFIX)
}

/// Capture is requested by the presence of the activation header
pub fn should_capture(headers: &HeaderMap, header_name: &str) -> bool {
    !header_name.is_empty() && headers.contains_key(header_name)
}

/// Copy the allow-listed headers (first value only)
pub fn extract_safe_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    SAFE_HEADERS
        .iter()
        .filter_map(|&name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Reconstruct the absolute URL the client requested
pub fn build_request_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match host {
        Some(host) => format!("{}://{}{}", scheme, host, path),
        None => path.to_string(),
    }
}

/// Trace and span ids from a W3C `traceparent` header, falling back to `x-trace-id`
///
/// Returns empty strings when no valid context is present.
pub fn trace_from_headers(headers: &HeaderMap) -> (String, String) {
    if let Some((trace_id, span_id)) = headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_traceparent)
    {
        return (trace_id, span_id);
    }

    let trace_id = headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    (trace_id.to_string(), String::new())
}

/// `version-traceid-spanid-flags`, e.g. `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`
fn parse_traceparent(value: &str) -> Option<(String, String)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;

    let valid = is_hex(version, 2)
        && version != "ff"
        && is_hex(trace_id, 32)
        && is_hex(span_id, 16)
        && is_hex(flags, 2)
        && !trace_id.bytes().all(|b| b == b'0')
        && !span_id.bytes().all(|b| b == b'0');

    valid.then(|| (trace_id.to_ascii_lowercase(), span_id.to_ascii_lowercase()))
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_should_skip_path() {
        assert!(should_skip_path("/favicon.ico"));
        assert!(should_skip_path("/static/FAVICON.ICO"));
        assert!(should_skip_path("/__reqscope/abc"));
        assert!(should_skip_path("/__reqscope/"));
        assert!(!should_skip_path("/"));
        assert!(!should_skip_path("/api/orders"));
    }

    #[test]
    fn test_should_capture() {
        let h = headers(&[("x-reqscope", "1")]);
        assert!(should_capture(&h, "X-Reqscope"));
        assert!(!should_capture(&h, "X-Other"));
        assert!(!should_capture(&h, ""));
    }

    #[test]
    fn test_extract_safe_headers() {
        let h = headers(&[
            ("accept", "application/json"),
            ("user-agent", "curl/8"),
            ("authorization", "Bearer secret"),
            ("cookie", "session=1"),
        ]);
        let safe = extract_safe_headers(&h);

        assert_eq!(safe.len(), 2);
        assert_eq!(safe["Accept"], "application/json");
        assert_eq!(safe["User-Agent"], "curl/8");
        assert!(!safe.contains_key("Authorization"));
    }

    #[test]
    fn test_build_request_url() {
        let uri: Uri = "/orders?page=2".parse().unwrap();
        let h = headers(&[("host", "shop.test")]);
        assert_eq!(build_request_url(&uri, &h), "http://shop.test/orders?page=2");

        let h = headers(&[("host", "shop.test"), ("x-forwarded-proto", "https")]);
        assert_eq!(build_request_url(&uri, &h), "https://shop.test/orders?page=2");

        assert_eq!(build_request_url(&uri, &HeaderMap::new()), "/orders?page=2");

        let absolute: Uri = "http://api.test:8080/x".parse().unwrap();
        assert_eq!(build_request_url(&absolute, &HeaderMap::new()), "http://api.test:8080/x");
    }

    #[test]
    fn test_trace_from_traceparent() {
        let h = headers(&[(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )]);
        let (trace_id, span_id) = trace_from_headers(&h);
        assert_eq!(trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span_id, "00f067aa0ba902b7");
    }

    #[test]
    fn test_invalid_traceparent_falls_back() {
        let h = headers(&[
            ("traceparent", "00-00000000000000000000000000000000-00f067aa0ba902b7-01"),
            ("x-trace-id", "legacy-123"),
        ]);
        assert_eq!(
            trace_from_headers(&h),
            ("legacy-123".to_string(), String::new())
        );

        assert_eq!(trace_from_headers(&HeaderMap::new()), (String::new(), String::new()));
        assert!(parse_traceparent("garbage").is_none());
    }
}
