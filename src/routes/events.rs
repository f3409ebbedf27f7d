//! # routes::events
//!
//! Dose event ledger. Every route sits behind [`crate::auth::require_event_token`].
//!
//! | Method | Path            | Description                                   |
//! |--------|-----------------|-----------------------------------------------|
//! | GET    | `/events`       | `since`, `until`, `limit` (1–5000), newest first |
//! | POST   | `/events`       | Record a bolus / basal dose                   |
//! | DELETE | `/events/:id`   | Remove one event                              |

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{EventFilter, NewEvent},
    state::SharedState,
};

pub const DEFAULT_EVENT_LIMIT: usize = 1000;
pub const MAX_EVENT_LIMIT: usize = 5000;

// ─── GET /events ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn list_events(
    State(state): State<SharedState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;

    let limit = match params.limit {
        None => DEFAULT_EVENT_LIMIT,
        Some(l) if (1..=MAX_EVENT_LIMIT as i64).contains(&l) => l as usize,
        Some(l) => {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_EVENT_LIMIT}, got {l}"
            )));
        }
    };

    let filter = EventFilter { since: params.since, until: params.until, limit };
    let events = state.ledger.query(&filter).await?;

    Ok(Json(json!({ "events": events })))
}

// ─── POST /events ─────────────────────────────────────────────────────────────

pub async fn create_event(
    State(state): State<SharedState>,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(new_event) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    if new_event.dose < 0 {
        return Err(AppError::Validation(format!("dose must not be negative, got {}", new_event.dose)));
    }

    let event = state.ledger.append(new_event.into_event(state.clock.now())).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "event": event })),
    ))
}

// ─── DELETE /events/:id ───────────────────────────────────────────────────────

pub async fn delete_event(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let not_found = || AppError::NotFound(format!("event {raw_id}"));

    let id = Uuid::parse_str(&raw_id).map_err(|_| not_found())?;
    if !state.ledger.delete(id).await? {
        return Err(not_found());
    }

    Ok(Json(json!({ "ok": true, "deleted": id })))
}
