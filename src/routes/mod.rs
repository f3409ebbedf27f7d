//! HTTP surface of the relay.

pub mod events;
pub mod glucose;
pub mod health;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use crate::{auth::require_event_token, state::SharedState};

/// All routes with state attached. Transport layers (CORS, tracing) are added
/// by the binary.
pub fn router(state: SharedState) -> Router {
    // ── Dose events (token required) ─────────────────────────────────────────
    let events = Router::new()
        .route("/events",     get(events::list_events).post(events::create_event))
        .route("/events/:id", delete(events::delete_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_event_token));

    Router::new()
        // ── Glucose ──────────────────────────────────────────────────────────
        .route("/glucose/latest",  get(glucose::latest))
        .route("/glucose/history", get(glucose::history))
        // ── Ops ──────────────────────────────────────────────────────────────
        .route("/health",          get(health::health_check))
        .merge(events)
        .with_state(state)
}
