//! Tagged application errors.
//!
//! Internal plumbing keeps using `anyhow::Result` with `.context(...)`,
//! the teacher's idiom throughout `scrapers/` and `signals/`. `AppError`
//! exists only at the C2/C4 boundary, where callers (the HTTP layer, the
//! consumer's retry policy) need to branch on *kind*, not message text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("upstream orders service unavailable: {0}")]
    UpstreamOrdersUnavailable(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("transient handler failure: {0}")]
    HandlerTransient(String),

    #[error("fatal handler failure: {0}")]
    HandlerFatal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamOrdersUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::MalformedEvent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HandlerTransient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::HandlerFatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::IndexUnavailable(_) => "index_unavailable",
            AppError::Cache(_) => "cache_error",
            AppError::UpstreamOrdersUnavailable(_) => "upstream_orders_unavailable",
            AppError::MalformedEvent(_) => "malformed_event",
            AppError::HandlerTransient(_) => "handler_transient",
            AppError::HandlerFatal(_) => "handler_fatal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": { "code": self.code(), "message": self.to_string() },
            "meta": { "timestamp": chrono::Utc::now().to_rfc3339() },
        });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
