//! # state
//!
//! The shared application state handed to every axum handler.
//!
//! The fetch coordinator owns the only mutable glucose state (cache and
//! throttle); handlers never touch it directly. The ledger guards its own
//! storage. `AppState` itself is immutable after startup.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::{CoordinatorConfig, FetchCoordinator};
use crate::ledger::EventLedger;
use crate::upstream::GlucoseSource;

// ─── AppState ─────────────────────────────────────────────────────────────────

/// Top-level shared state injected into every axum handler.
pub struct AppState {
    pub config:      Arc<Config>,

    // ── Glucose pipeline ──────────────────────────────────────────────────────
    /// Upstream source. `history` calls it directly; `latest` goes through the
    /// coordinator.
    pub source:      Arc<dyn GlucoseSource>,
    pub coordinator: FetchCoordinator,

    // ── Dose events ───────────────────────────────────────────────────────────
    pub ledger:      EventLedger,

    pub clock:       Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: Config,
        source: Arc<dyn GlucoseSource>,
        ledger: EventLedger,
        clock:  Arc<dyn Clock>,
    ) -> Self {
        let coordinator = FetchCoordinator::new(
            source.clone(),
            clock.clone(),
            CoordinatorConfig::from(&config),
        );

        Self {
            config: Arc::new(config),
            source,
            coordinator,
            ledger,
            clock,
        }
    }

    /// Events are reachable only when a secret is configured.
    pub fn events_enabled(&self) -> bool {
        self.config.events_token.is_some()
    }
}

/// Convenience type alias
pub type SharedState = Arc<AppState>;

pub fn build_state(config: Config, source: Arc<dyn GlucoseSource>, ledger: EventLedger) -> SharedState {
    Arc::new(AppState::new(config, source, ledger, Arc::new(SystemClock)))
}
