use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Storage error kinds
///
/// Every storage backend and the service facade report failures through
/// exactly these three kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No record exists under the requested id
    #[error("Metadata not found: {0}")]
    NotFound(String),
    /// The caller handed over something that cannot be stored
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The backend could not be reached, timed out, or returned garbage
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &StorageError) -> &'static str {
    match error {
        StorageError::NotFound(_) => "not_found",
        StorageError::InvalidInput(_) => "invalid_input",
        StorageError::BackendUnavailable(_) => "backend_unavailable",
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::BackendUnavailable(format!("JSON error: {}", err))
    }
}
