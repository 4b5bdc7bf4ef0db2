use super::capture::INSPECTION_PREFIX;
use super::{PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER};
use crate::error::StorageError;
use crate::metadata::Metadata;
use crate::service::Profiler;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// Routes serving stored records to debugging tools
///
/// - `GET /__reqscope/latest?limit=n`: newest records first
/// - `GET /__reqscope/:id`: one record; the id header, when present, wins over the path
pub fn inspection_router(profiler: Arc<Profiler>) -> Router {
    Router::new()
        .route(&format!("{}/latest", INSPECTION_PREFIX), get(list_recent))
        .route(&format!("{}/:id", INSPECTION_PREFIX), get(get_metadata))
        .with_state(profiler)
}

async fn get_metadata(
    State(profiler): State<Arc<Profiler>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, StorageError> {
    let id = resolve_metadata_id(&headers, &profiler.config().id_header_name, &id);
    if id.is_empty() {
        return Err(StorageError::InvalidInput("metadata id is required".to_string()));
    }

    let metadata = profiler.get_metadata(&id).await.map_err(|e| {
        tracing::debug!(request_id = %id, error = %e, "Metadata lookup failed");
        match e {
            StorageError::BackendUnavailable(_) => e,
            _ => StorageError::NotFound(id.clone()),
        }
    })?;

    Ok(with_version_header(Json(metadata)))
}

async fn list_recent(
    State(profiler): State<Arc<Profiler>>,
    Query(params): Query<ListParams>,
) -> Result<Response, StorageError> {
    let records: Vec<Arc<Metadata>> = profiler.list_metadata(params.limit.unwrap_or(0)).await?;
    Ok(with_version_header(Json(records)))
}

fn resolve_metadata_id(headers: &HeaderMap, id_header: &str, path_id: &str) -> String {
    if !id_header.is_empty() {
        if let Some(id) = headers
            .get(id_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return id.to_string();
        }
    }
    path_id.trim().to_string()
}

fn with_version_header(body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        PROTOCOL_VERSION_HEADER,
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    response
}
