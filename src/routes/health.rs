//! # routes::health
//!
//! `GET /health`: configuration echo plus the coordinator's current throttle
//! view. Never calls upstream and needs no credential.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::SharedState;

pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.coordinator.config();
    let status = state.coordinator.status();

    Json(json!({
        "ok":                     true,
        "region":                 state.config.region,
        "configured":             state.config.credentials().is_some(),
        "cache_ttl_sec":          config.cache_ttl_secs,
        "min_fetch_interval_sec": config.min_fetch_interval_secs,
        "backoff_after_429_sec":  config.backoff_after_429_secs,
        "history_max_points":     state.config.history_max_points,
        "events_enabled":         state.events_enabled(),
        "events_backend":         state.ledger.backend_name(),
        "cache":                  status,
    }))
}
