//! Maps the boundary [`omtx_types::ApiError`] onto an HTTP response, and
//! gives every handler a single `Result<T, ApiError>` return type to work
//! with via the `From` impls below.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use omtx_types::error::{ApiError as CoreError, ErrorKind};

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl From<omtx_job_store::JobStoreError> for ApiError {
    fn from(e: omtx_job_store::JobStoreError) -> Self {
        use omtx_job_store::JobStoreError::*;
        let kind = match &e {
            NotFound(_) => ErrorKind::NotFound,
            IllegalTransition { .. } => ErrorKind::Conflict,
            _ => ErrorKind::DatabaseUnavailable,
        };
        Self(CoreError::new(kind, e.to_string()))
    }
}

impl From<omtx_storage_gateway::StorageError> for ApiError {
    fn from(e: omtx_storage_gateway::StorageError) -> Self {
        let kind = match &e {
            omtx_storage_gateway::StorageError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::StorageUnavailable,
        };
        Self(CoreError::new(kind, e.to_string()))
    }
}

impl From<omtx_dispatch::DispatchError> for ApiError {
    fn from(e: omtx_dispatch::DispatchError) -> Self {
        Self(CoreError::new(ErrorKind::DispatchFailed, e.to_string()))
    }
}

impl From<omtx_aggregator::AggregatorError> for ApiError {
    fn from(e: omtx_aggregator::AggregatorError) -> Self {
        Self(CoreError::new(ErrorKind::InternalError, e.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": {
                "kind": self.0.kind,
                "message": self.0.message,
                "details": self.0.details,
            }
        }));
        (status, body).into_response()
    }
}
