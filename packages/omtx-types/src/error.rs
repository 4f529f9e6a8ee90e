//! Boundary error type returned by the Submission API.
//!
//! Every crate in the workspace maps its own `thiserror` error enum into
//! one of these kinds at the point it crosses into HTTP. The kind drives
//! both the status code and the machine-readable `error.kind` field in
//! the response body.

use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    RateLimited,
    QuotaExceeded,
    AuthError,
    NotFound,
    Forbidden,
    Conflict,
    DispatchFailed,
    StorageUnavailable,
    DatabaseUnavailable,
    InternalError,
}

impl ErrorKind {
    /// HTTP status code this kind maps to at the API boundary.
    pub fn status_code(self) -> u16 {
        use ErrorKind::*;
        match self {
            ValidationError => 400,
            AuthError => 401,
            Forbidden => 403,
            NotFound => 404,
            Conflict => 409,
            QuotaExceeded => 429,
            RateLimited => 429,
            DispatchFailed => 502,
            StorageUnavailable => 503,
            DatabaseUnavailable => 503,
            InternalError => 500,
        }
    }
}

/// Structured error body returned by every API endpoint on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn quota_exceeded(violations: JsonValue) -> Self {
        Self::new(ErrorKind::QuotaExceeded, "one or more resource quotas exceeded")
            .with_details(violations)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_429() {
        let err = ApiError::quota_exceeded(serde_json::json!({"resource": "gpu_minutes"}));
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(ApiError::not_found("job not found").status_code(), 404);
    }
}
