/// Integration tests for the axum capture middleware and inspection routes
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use reqscope::{
    config::ProfilerConfig,
    http::capture_middleware,
    server::create_router,
    storage::{InMemoryStorage, Storage},
    Metadata, Profiler,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ID_HEADER: &str = "x-reqscope-id";

fn test_app() -> (Router, Arc<Profiler>) {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new(20, 0));
    let profiler = Arc::new(
        Profiler::new(ProfilerConfig::default(), Some(storage)).with_stack_capture(None),
    );
    (create_router(profiler.clone()), profiler)
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn captured_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Reqscope", "1")
        .header("host", "shop.test")
        .header("user-agent", "reqscope-tests")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_request_without_activation_header_is_not_captured() {
    let (app, profiler) = test_app();

    let response = send(
        &app,
        Request::builder().uri("/demo/orders/1").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(ID_HEADER).is_none());
    assert!(profiler.list_metadata(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_captured_request_round_trip() {
    let (app, _profiler) = test_app();

    let response = send(&app, captured_get("/demo/orders/42?expand=items")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-reqscope-version").unwrap(), "1");
    let id = response
        .headers()
        .get(ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/__reqscope/{}", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-reqscope-version").unwrap(), "1");
    assert!(response.headers().get(ID_HEADER).is_none());

    let body = json_body(response).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["type"], "request");
    assert_eq!(body["method"], "GET");
    assert_eq!(body["uri"], "/demo/orders/42?expand=items");
    assert_eq!(body["url"], "http://shop.test/demo/orders/42?expand=items");
    assert_eq!(body["controller"], "/demo/orders/:id");
    assert_eq!(body["responseStatus"], 200);
    assert_eq!(body["headers"]["User-Agent"], "reqscope-tests");
    assert!(body["headers"].get("Authorization").is_none());
    assert!(body["headers"].get("authorization").is_none());
    assert_eq!(body["databaseQueriesCount"], 1);
    assert_eq!(body["cacheQueries"][0]["key"], "order:42");
    assert_eq!(body["userData"]["order_id"], 42);

    let messages: Vec<&str> = body["log"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["message"].as_str())
        .collect();
    assert!(messages.contains(&"request capture enabled"));
    assert!(messages.contains(&"request completed"));

    // The body deserializes back into the record type
    let metadata: Metadata = serde_json::from_value(body).unwrap();
    assert_eq!(metadata.database_queries.len(), 1);
}

#[tokio::test]
async fn test_unknown_id_returns_not_found() {
    let (app, _profiler) = test_app();

    let response = send(
        &app,
        Request::builder()
            .uri("/__reqscope/does-not-exist")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn test_id_header_overrides_path_on_lookup() {
    let (app, _profiler) = test_app();

    let response = send(&app, captured_get("/health")).await;
    let id = response.headers().get(ID_HEADER).unwrap().clone();

    let response = send(
        &app,
        Request::builder()
            .uri("/__reqscope/placeholder")
            .header(ID_HEADER, id.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], id.to_str().unwrap());
    assert_eq!(body["uri"], "/health");
}

#[tokio::test]
async fn test_inspection_routes_are_never_captured() {
    let (app, profiler) = test_app();

    let response = send(
        &app,
        Request::builder()
            .uri("/__reqscope/latest")
            .header("X-Reqscope", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(ID_HEADER).is_none());
    assert!(profiler.list_metadata(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_lists_newest_first() {
    let (app, _profiler) = test_app();

    for uri in ["/health", "/demo/orders/1", "/demo/orders/2"] {
        let response = send(&app, captured_get(uri)).await;
        assert!(response.headers().get(ID_HEADER).is_some());
    }

    let response = send(
        &app,
        Request::builder()
            .uri("/__reqscope/latest?limit=2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let uris: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|record| record["uri"].as_str())
        .collect();
    assert_eq!(uris, vec!["/demo/orders/2", "/demo/orders/1"]);
}

#[tokio::test]
async fn test_traceparent_is_recorded() {
    let (app, profiler) = test_app();

    let response = send(
        &app,
        Request::builder()
            .uri("/health")
            .header("X-Reqscope", "1")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let id = response.headers().get(ID_HEADER).unwrap().to_str().unwrap().to_string();

    let metadata = profiler.get_metadata(&id).await.unwrap();
    assert_eq!(metadata.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(metadata.span_id, "00f067aa0ba902b7");
    assert!(!profiler.has_active_traces());
}

fn traced_get(uri: &str, trace_id: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Reqscope", "1")
        .header("x-trace-id", trace_id)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_long_trace_ids_do_not_stay_registered() {
    let (app, profiler) = test_app();
    let trace_id = "a".repeat(3001);

    for _ in 0..3 {
        let response = send(&app, traced_get("/health", &trace_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(profiler.traces().active_count(), 0);
}

#[tokio::test]
async fn test_dropped_request_releases_trace() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new(20, 0));
    let profiler = Arc::new(
        Profiler::new(ProfilerConfig::default(), Some(storage)).with_stack_capture(None),
    );
    let app = Router::new()
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            }),
        )
        .route("/fast", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(profiler.clone(), capture_middleware));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        app.clone().oneshot(traced_get("/slow", "abandoned-trace")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(profiler.traces().active_count(), 0);
    // Abandoned requests are never persisted
    assert!(profiler.list_metadata(0).await.unwrap().is_empty());

    // The single-active fallback still works for the next live request
    let live = profiler.new_collector("GET", "/live").unwrap();
    profiler.register_trace("live-trace", &live);
    assert!(profiler.record_log_for_single_active("info", "routed", &[], Vec::new()));
    assert_eq!(live.metadata().log_entries[0].message, "routed");

    let response = send(&app, traced_get("/fast", "fast-trace")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(profiler.traces().active_count(), 1);
}
