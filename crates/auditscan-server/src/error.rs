use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use auditscan_scan::ScanError;
use auditscan_source::SourceError;

/// Request failures, mapped to HTTP status codes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid pattern: {0}")]
    BadPattern(#[from] regex::Error),

    #[error("objectPath must not be empty")]
    EmptyPath,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadPattern(_) | Self::EmptyPath => StatusCode::BAD_REQUEST,
            Self::Source(SourceError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            Self::Source(SourceError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Source(SourceError::Status { .. } | SourceError::Http(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Source(SourceError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Scan(ScanError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Scan(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
