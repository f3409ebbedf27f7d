//! # upstream
//!
//! Everything that talks to the sensor-sharing service.
//!
//! The rest of the crate only sees [`GlucoseSource`]. The fetch coordinator
//! reacts differently to [`UpstreamError::RateLimited`] (backoff) and every
//! other failure (serve stale, leave throttle state alone), so the two must
//! never be folded together.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Reading;

pub mod librelinkup;
pub mod region;

pub use librelinkup::LibreLinkUpClient;
pub use region::Region;

#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Credentials are missing from the server configuration.
    #[error("missing LIBRE_EMAIL / LIBRE_PASSWORD")]
    NotConfigured,

    /// Login refused, terms not accepted, redirect loop.
    #[error("{0}")]
    Auth(String),

    /// The account has no patients sharing data with it.
    #[error("no shared patients on this account")]
    NoPatients,

    /// HTTP 429 from upstream.
    #[error("upstream rate limit (HTTP 429)")]
    RateLimited,

    /// Network errors, timeouts, 5xx, unparseable bodies.
    #[error("{0}")]
    Transient(String),
}

/// A fallible, rate-limited source of glucose readings for one patient.
#[async_trait]
pub trait GlucoseSource: Send + Sync {
    /// The most recent reading.
    async fn latest(&self) -> Result<Reading, UpstreamError>;

    /// Recent readings in no guaranteed order.
    async fn history(&self) -> Result<Vec<Reading>, UpstreamError>;
}
