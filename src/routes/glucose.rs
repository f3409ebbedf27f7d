//! # routes::glucose
//!
//! | Method | Path                        | Description                         |
//! |--------|-----------------------------|-------------------------------------|
//! | GET    | `/glucose/latest`           | Latest reading via the coordinator  |
//! | GET    | `/glucose/history?hours=N`  | Windowed, decimated upstream series |

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    engine::build_window,
    error::AppError,
    models::{HistoryPoint, LatestPayload},
    state::SharedState,
};

pub const DEFAULT_HISTORY_HOURS: u32 = 24;
pub const MAX_HISTORY_HOURS: u32 = 168;

// ─── GET /glucose/latest ──────────────────────────────────────────────────────

pub async fn latest(State(state): State<SharedState>) -> Result<Json<LatestPayload>, AppError> {
    let outcome = state.coordinator.get_latest().await?;
    Ok(Json(outcome.into_payload()))
}

// ─── GET /glucose/history ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub points: Vec<HistoryPoint>,
    pub hours:  u32,
    pub count:  usize,
}

/// Always hits upstream; the latest cache is neither read nor written here.
pub async fn history(
    State(state): State<SharedState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<HistoryResponse>, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;
    let hours = validate_hours(params.hours)?;

    let series = state.source.history().await?;
    let raw_count = series.len();

    let window = build_window(series, hours, state.config.history_max_points, state.clock.now());
    debug!(hours, raw_count, served = window.len(), "History window built");

    let points: Vec<HistoryPoint> = window.iter().map(HistoryPoint::from).collect();
    Ok(Json(HistoryResponse {
        count: points.len(),
        points,
        hours,
    }))
}

fn validate_hours(hours: Option<i64>) -> Result<u32, AppError> {
    match hours {
        None => Ok(DEFAULT_HISTORY_HOURS),
        Some(h) if (1..=i64::from(MAX_HISTORY_HOURS)).contains(&h) => Ok(h as u32),
        Some(h) => Err(AppError::Validation(format!(
            "hours must be between 1 and {MAX_HISTORY_HOURS}, got {h}"
        ))),
    }
}
