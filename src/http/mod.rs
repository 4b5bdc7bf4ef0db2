//! axum adapter: capture middleware and inspection routes

pub mod capture;
pub mod middleware;
pub mod routes;

use axum::http::HeaderName;

pub use middleware::{capture_middleware, RequestCollector};
pub use routes::inspection_router;

/// Version of the inspection protocol, sent on every captured response
pub const PROTOCOL_VERSION: &str = "1";

pub const PROTOCOL_VERSION_HEADER: HeaderName = HeaderName::from_static("x-reqscope-version");
