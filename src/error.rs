//! # error
//!
//! Centralised application error type.
//!
//! Every handler returns `Result<_, AppError>`. Axum's `IntoResponse` impl
//! converts these into structured JSON error bodies so dashboards and scripts
//! always get a machine-readable response, even on failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Server is missing upstream credentials.
    #[error("Server not configured: {0}")]
    Config(String),

    /// Upstream login was refused.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// Upstream is rate limiting us and there is no cached reading to serve.
    #[error("Upstream rate limited, no cached reading available")]
    RateLimited { retry_at: Option<DateTime<Utc>> },

    /// Upstream unreachable or failing, and no cached reading to serve.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was well-formed HTTP but its content is invalid.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotConfigured  => AppError::Config(UpstreamError::NotConfigured.to_string()),
            UpstreamError::Auth(msg)      => AppError::UpstreamAuth(msg),
            UpstreamError::NoPatients     => AppError::NotFound(UpstreamError::NoPatients.to_string()),
            UpstreamError::RateLimited    => AppError::RateLimited { retry_at: None },
            UpstreamError::Transient(msg) => AppError::Unavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_)            => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamAuth(_)      => StatusCode::BAD_GATEWAY,
            AppError::RateLimited { .. }   => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_)       => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_)          => StatusCode::NOT_FOUND,
            AppError::Validation(_)        => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized         => StatusCode::UNAUTHORIZED,
            AppError::Internal(_)          => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({
            "ok":    false,
            "error": self.to_string(),
        });
        if let AppError::RateLimited { retry_at: Some(at) } = &self {
            body["retry_at"] = json!(at);
        }

        (status, Json(body)).into_response()
    }
}
