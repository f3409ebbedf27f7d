//! # auth — Event Ledger Token Middleware
//!
//! Guards every `/events*` route with the `EVENTS_TOKEN` secret.
//!
//! ## Credential
//! - `Authorization: Bearer <token>` header, or
//! - `?token=<token>` query parameter (handy for quick browser checks)
//!
//! ## Mode
//! - `EVENTS_TOKEN` unset (or blank) → **every request rejected**. The ledger
//!   fails closed.
//!
//! ## Usage
//! ```bash
//! curl -H "Authorization: Bearer $EVENTS_TOKEN" http://localhost:8000/events
//! ```

use axum::{
    extract::{Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::{error::AppError, state::SharedState};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Axum middleware: checks the presented credential against `EVENTS_TOKEN`.
pub async fn require_event_token(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.config.events_token.as_deref() else {
        warn!(path = request.uri().path(), "❌ Ledger request rejected — EVENTS_TOKEN not configured");
        return AppError::Unauthorized.into_response();
    };

    match presented_token(&request) {
        Some(provided) if constant_time_eq(provided.as_bytes(), secret.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            warn!(path = request.uri().path(), "❌ Unauthorized ledger request — invalid or missing token");
            AppError::Unauthorized.into_response()
        }
    }
}

fn presented_token(request: &Request) -> Option<String> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    bearer.or_else(|| {
        Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(q)| q.token)
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
