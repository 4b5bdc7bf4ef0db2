use anyhow::Result;
use axum::{
    extract::Path,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    http::{capture_middleware, inspection_router, RequestCollector},
    integrations::{CacheObserver, QueryObservation, SqlObserver},
    service::{spawn_cleanup_task, Profiler},
};

/// Start the demo server
///
/// This function:
/// 1. Spawns the retention sweep
/// 2. Creates the Axum application with the capture middleware
/// 3. Binds to the configured address
/// 4. Serves requests until Ctrl-C
pub async fn start_server(config: Config, profiler: Arc<Profiler>) -> Result<()> {
    let cleanup_handle = spawn_cleanup_task(Arc::clone(&profiler));

    let app = create_router(profiler.clone());

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting reqscope demo server on {}", addr);
    info!(
        enabled = profiler.is_enabled(),
        storage = ?config.profiler.storage.kind,
        header = %config.profiler.header_name,
        "Request capture configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    if let Some(handle) = cleanup_handle {
        handle.abort();
    }
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with demo routes, inspection routes and capture middleware
pub fn create_router(profiler: Arc<Profiler>) -> Router {
    let sql = SqlObserver::new(profiler.config().slow_query_threshold());

    let demo_routes = Router::new()
        .route("/health", get(health_check))
        .route("/demo/orders/:id", get(show_order))
        .layer(Extension(sql));

    Router::new()
        .merge(demo_routes)
        .merge(inspection_router(profiler.clone()))
        .layer(middleware::from_fn_with_state(profiler, capture_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Simulated order lookup touching a cache and a database
async fn show_order(
    Path(id): Path<u64>,
    Extension(sql): Extension<SqlObserver>,
    collector: Option<Extension<RequestCollector>>,
) -> impl IntoResponse {
    let collector = collector.map(|Extension(c)| c);
    let collector = collector.as_deref();

    let cache_key = format!("order:{}", id);
    let cached: Option<String> = CacheObserver::new()
        .timed(collector, "get", &cache_key, async { None })
        .await;

    if cached.is_none() {
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(2)).await;
        sql.on_query(
            collector,
            QueryObservation {
                operation: "query",
                sql: "SELECT id, status, total FROM orders WHERE id = $1",
                connection: "demo",
                duration: started.elapsed(),
                ..Default::default()
            },
        );
        info!(order_id = id, "Order loaded from database");
    }

    if let Some(collector) = collector {
        collector.set_user_data("order_id", id);
    }

    Json(json!({ "id": id, "status": "shipped" }))
}
