pub mod budgets;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod integrations;
pub mod layer;
pub mod metadata;
pub mod registry;
pub mod server;
pub mod service;
pub mod storage;

pub use budgets::ResourceBudgets;
pub use collector::{Collector, QuerySource};
pub use config::{Config, ProfilerConfig};
pub use error::StorageError;
pub use layer::RequestLogLayer;
pub use metadata::{FieldValue, Metadata};
pub use registry::TraceRegistry;
pub use service::{spawn_cleanup_task, DataSource, Profiler};
pub use storage::Storage;

use config::ServerConfig;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter(server: &ServerConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&server.log_level))
}

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the configured level. Can only take effect once per
/// process; later calls print a warning and leave the first subscriber in place.
pub fn init_tracing(server: &ServerConfig) {
    let json = server.log_format == "json";

    let result = tracing_subscriber::registry()
        .with(env_filter(server))
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true)))
        .try_init();

    if let Err(e) = result {
        eprintln!("Warning: Failed to initialize tracing: {}", e);
    }
}

/// Initialize tracing with the request log layer installed
///
/// Application events emitted while a request is captured are copied into
/// that request's record (see [`RequestLogLayer`]).
pub fn init_tracing_with_capture(server: &ServerConfig, profiler: Arc<Profiler>) {
    let json = server.log_format == "json";

    let result = tracing_subscriber::registry()
        .with(env_filter(server))
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true)))
        .with(RequestLogLayer::new(profiler))
        .try_init();

    match result {
        Ok(()) => {
            tracing::info!("Request log layer added to tracing subscriber");
        }
        Err(e) => {
            eprintln!("Warning: Failed to add request log layer: {}", e);
            eprintln!("Application logs will not be attached to captured requests");
        }
    }
}
