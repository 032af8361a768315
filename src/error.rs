use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::ai::AnalysisError;
use crate::ingest::IngestError;
use crate::sessions::StoreError;

/// Errors surfaced by the HTTP layer. Every variant renders as
/// `{"error": message}` with the matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Format(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Unknown session '{0}'")]
    UnknownSession(String),
    #[error("Session '{0}' not found")]
    SessionNotFound(String),
    #[error("No data uploaded yet. Please upload a file first.")]
    NoData,
    #[error("File too large. The limit is {} MB.", .0 / (1024 * 1024))]
    PayloadTooLarge(usize),
    #[error("{0}")]
    Upstream(String),
    #[error("{what} timed out after {} seconds", .after.as_secs())]
    Timeout { what: &'static str, after: Duration },
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    /// GET endpoints keyed by session report an unknown id as 404.
    pub fn as_not_found(self) -> Self {
        match self {
            ApiError::UnknownSession(id) => ApiError::SessionNotFound(id),
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Format(_)
            | ApiError::BadRequest(_)
            | ApiError::UnknownSession(_)
            | ApiError::NoData => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(detail) = &self {
            error!(detail = %detail, "internal error");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Format(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownSession(id) => ApiError::UnknownSession(id),
            StoreError::NoData => ApiError::NoData,
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::NoData => ApiError::NoData,
            AnalysisError::Upstream(e) => {
                ApiError::Upstream(format!("Error communicating with the model: {}", e))
            }
            AnalysisError::Timeout(after) => ApiError::Timeout {
                what: "Model request",
                after,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// Multipart failures; `limit` is the configured upload size.
    pub fn from_multipart(err: MultipartError, limit: usize) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}
