//! # engine::coordinator
//!
//! **Fetch Coordinator**: decides, for every `latest` request, whether to serve
//! the cache, call upstream, or fall back to a stale reading.
//!
//! ## Decision order
//!
//! ```text
//! request
//!   │
//!   ├─ [1] cache younger than TTL          → Fresh            (no upstream call)
//!   │
//!   ├─ [2] now < next_allowed_fetch_at     → Stale + deadline  │ no cache → 429
//!   │
//!   ├─ [3] last fetch < MIN_FETCH_INTERVAL → Stale             │ no cache → fall through
//!   │
//!   └─ [4] fetch upstream
//!          ├─ ok          → JustFetched, renew soft throttle
//!          ├─ 429         → arm backoff, Stale + backoff_until │ no cache → 429
//!          └─ other error → Stale                              │ no cache → 503
//!                                                                (500 / 404 for config / no patient)
//! ```
//!
//! Steps 1–4 and the state writes run under one mutex, so at most one upstream
//! call for the latest reading is ever in flight. Callers queued behind a fetch
//! see its result at step 1.
//!
//! Every state write is also published to a small snapshot behind its own lock.
//! [`FetchCoordinator::status`] reads only the snapshot and never waits on a fetch.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Config, MAX_WINDOW_SECS};
use crate::error::AppError;
use crate::models::LatestPayload;
use crate::upstream::{GlucoseSource, UpstreamError};

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub cache_ttl_secs:          u64,
    pub min_fetch_interval_secs: u64,
    pub backoff_after_429_secs:  u64,
}

impl CoordinatorConfig {
    fn ttl(&self) -> Duration {
        window(self.cache_ttl_secs)
    }

    fn min_interval(&self) -> Duration {
        window(self.min_fetch_interval_secs)
    }

    fn backoff(&self) -> Duration {
        window(self.backoff_after_429_secs)
    }
}

fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// `at + span`, pinned to the last representable instant instead of overflowing.
fn deadline(at: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    at.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            cache_ttl_secs:          config.cache_ttl_secs,
            min_fetch_interval_secs: config.min_fetch_interval_secs,
            backoff_after_429_secs:  config.backoff_after_429_secs,
        }
    }
}

// ─── Internal State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
    cached_at: DateTime<Utc>,
    payload:   LatestPayload,
}

/// Why `next_allowed_fetch_at` is set. Picks the marker served with stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThrottleCause {
    MinInterval,
    RateLimited,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThrottleState {
    last_fetch_at:         Option<DateTime<Utc>>,
    next_allowed_fetch_at: Option<DateTime<Utc>>,
    cause:                 Option<ThrottleCause>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    cache:    Option<CacheEntry>,
    throttle: ThrottleState,
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    /// Inside the minimum-interval window armed by the last successful fetch.
    Throttled { until: DateTime<Utc> },
    /// Cooling down after an upstream 429.
    BackingOff { until: DateTime<Utc> },
    /// Last fetch was too recent (no explicit deadline armed).
    MinInterval,
    /// Upstream failed for a reason other than rate limiting.
    UpstreamFailed(String),
}

/// Result of one `get_latest` decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Latest {
    Fresh(LatestPayload),
    JustFetched(LatestPayload),
    Stale { payload: LatestPayload, reason: StaleReason },
}

impl Latest {
    pub fn is_stale(&self) -> bool {
        matches!(self, Latest::Stale { .. })
    }

    /// The body to serve. Stale results carry `stale: true` and their deadline.
    pub fn into_payload(self) -> LatestPayload {
        match self {
            Latest::Fresh(payload) | Latest::JustFetched(payload) => payload,
            Latest::Stale { mut payload, reason } => {
                payload.stale = Some(true);
                match reason {
                    StaleReason::Throttled { until }  => payload.throttled_until = Some(until),
                    StaleReason::BackingOff { until } => payload.backoff_until = Some(until),
                    StaleReason::MinInterval | StaleReason::UpstreamFailed(_) => {}
                }
                payload
            }
        }
    }
}

/// What `status` reads. Written after every state change, under its own lock.
#[derive(Debug, Default, Clone, Copy)]
struct Snapshot {
    cached_at: Option<DateTime<Utc>>,
    throttle:  ThrottleState,
}

/// Snapshot for `/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CoordinatorStatus {
    pub cached_at:             Option<DateTime<Utc>>,
    pub last_fetch_at:         Option<DateTime<Utc>>,
    pub next_allowed_fetch_at: Option<DateTime<Utc>>,
    pub backing_off:           bool,
}

// ─── Fetch Coordinator ────────────────────────────────────────────────────────

pub struct FetchCoordinator {
    source: Arc<dyn GlucoseSource>,
    clock:  Arc<dyn Clock>,
    config: CoordinatorConfig,
    state:  Mutex<CoordinatorState>,
    snapshot: std::sync::Mutex<Snapshot>,
}

impl FetchCoordinator {
    pub fn new(source: Arc<dyn GlucoseSource>, clock: Arc<dyn Clock>, config: CoordinatorConfig) -> Self {
        Self {
            source,
            clock,
            config,
            state: Mutex::new(CoordinatorState::default()),
            snapshot: std::sync::Mutex::new(Snapshot::default()),
        }
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.config
    }

    pub async fn get_latest(&self) -> Result<Latest, AppError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        // ── [1] Fresh cache ──────────────────────────────────────────────────
        if let Some(entry) = &state.cache {
            if now - entry.cached_at <= self.config.ttl() {
                debug!(age_secs = (now - entry.cached_at).num_seconds(), "Serving fresh cache");
                return Ok(Latest::Fresh(entry.payload.clone()));
            }
        }

        // ── [2] Hard throttle ────────────────────────────────────────────────
        if let Some(until) = state.throttle.next_allowed_fetch_at {
            if now < until {
                let reason = match state.throttle.cause {
                    Some(ThrottleCause::RateLimited) => StaleReason::BackingOff { until },
                    _ => StaleReason::Throttled { until },
                };
                return match &state.cache {
                    Some(entry) => {
                        debug!(%until, "Throttled — serving stale cache");
                        Ok(stale(entry, reason))
                    }
                    None => {
                        warn!(%until, "Throttled with empty cache");
                        Err(AppError::RateLimited { retry_at: Some(until) })
                    }
                };
            }
        }

        // ── [3] Soft throttle (cold cache falls through) ─────────────────────
        if let (Some(last), Some(entry)) = (state.throttle.last_fetch_at, &state.cache) {
            if now - last < self.config.min_interval() {
                debug!("Minimum fetch interval not elapsed — serving stale cache");
                return Ok(stale(entry, StaleReason::MinInterval));
            }
        }

        // ── [4] Fetch ────────────────────────────────────────────────────────
        let result = self.source.latest().await;
        let now = self.clock.now();

        match result {
            Ok(reading) => {
                let payload = LatestPayload::from(&reading);
                let cached_at = match &state.cache {
                    Some(prev) if prev.cached_at > now => prev.cached_at,
                    _ => now,
                };

                state.cache = Some(CacheEntry { cached_at, payload: payload.clone() });
                state.throttle = ThrottleState {
                    last_fetch_at:         Some(now),
                    next_allowed_fetch_at: Some(deadline(now, self.config.min_interval())),
                    cause:                 Some(ThrottleCause::MinInterval),
                };
                self.publish(&state);

                info!(
                    mmol  = reading.value,
                    trend = %reading.trend,
                    at    = %reading.timestamp,
                    "Fetched latest reading"
                );
                Ok(Latest::JustFetched(payload))
            }

            Err(UpstreamError::RateLimited) => {
                let until = deadline(now, self.config.backoff());
                state.throttle.next_allowed_fetch_at = Some(until);
                state.throttle.cause = Some(ThrottleCause::RateLimited);
                self.publish(&state);

                warn!(%until, "⚠️ Upstream rate limited — backing off");
                match &state.cache {
                    Some(entry) => Ok(stale(entry, StaleReason::BackingOff { until })),
                    None => Err(AppError::RateLimited { retry_at: Some(until) }),
                }
            }

            Err(err) => {
                warn!(error = %err, "Upstream fetch failed");
                match &state.cache {
                    Some(entry) => Ok(stale(entry, StaleReason::UpstreamFailed(err.to_string()))),
                    None => Err(cold_failure(err)),
                }
            }
        }
    }

    /// Last published cache and throttle view. Does not wait for an in-flight fetch.
    pub fn status(&self) -> CoordinatorStatus {
        let snap = *self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = self.clock.now();
        CoordinatorStatus {
            cached_at:             snap.cached_at,
            last_fetch_at:         snap.throttle.last_fetch_at,
            next_allowed_fetch_at: snap.throttle.next_allowed_fetch_at,
            backing_off: snap.throttle.cause == Some(ThrottleCause::RateLimited)
                && snap.throttle.next_allowed_fetch_at.is_some_and(|t| now < t),
        }
    }

    fn publish(&self, state: &CoordinatorState) {
        let mut snap = self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *snap = Snapshot {
            cached_at: state.cache.as_ref().map(|e| e.cached_at),
            throttle:  state.throttle,
        };
    }
}

/// Error for a failed fetch with nothing cached. Missing credentials and an
/// account without patients keep their own status; everything else is 503.
fn cold_failure(err: UpstreamError) -> AppError {
    match err {
        UpstreamError::NotConfigured | UpstreamError::NoPatients => err.into(),
        other => AppError::Unavailable(other.to_string()),
    }
}

fn stale(entry: &CacheEntry, reason: StaleReason) -> Latest {
    Latest::Stale { payload: entry.payload.clone(), reason }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
