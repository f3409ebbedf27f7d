//! # Glucose Relay
//!
//! Serves LibreLinkUp glucose readings to many readers without tripping the
//! upstream's rate limits.
//!
//! ```text
//!  ┌────────────┐ GET /glucose/latest  ┌──────────────────────────────┐      ┌─────────────┐
//!  │  Readers   │ ───────────────────▶ │ FetchCoordinator             │ ───▶ │ LibreLinkUp │
//!  │ (widgets,  │                      │ ├─ cache (TTL)               │  ≤1  │   (429s)    │
//!  │  bots, UI) │ GET /glucose/history │ └─ throttle / backoff        │ call │             │
//!  │            │ ───────────────────▶ │ build_window ◀───────────────┼───── │             │
//!  │            │                      └──────────────────────────────┘      └─────────────┘
//!  │            │ GET/POST/DELETE /events  ┌─────────────┐
//!  │            │ ───────────────────────▶ │ EventLedger │  (EVENTS_TOKEN)
//!  └────────────┘                          └─────────────┘
//! ```

pub mod auth;
pub mod clock;
pub mod config;
#[cfg(feature = "postgres")]
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod state;
pub mod upstream;

pub use config::Config;
pub use error::AppError;
pub use state::{AppState, SharedState};
