//! # models::reading
//!
//! Defines [`Reading`], one glucose measurement as returned by the upstream
//! sensor-sharing service, and the projections the HTTP layer serves from it.
//!
//! Values are carried in **mmol/L**. mg/dL is always derived with
//! [`mmol_to_mgdl`] so both units stay consistent across `latest` and `history`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction the sensor reports the glucose curve is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    RisingFast,
    Rising,
    Stable,
    Falling,
    FallingFast,
    Unknown,
}

impl Trend {
    /// Maps the upstream `TrendArrow` code (1 = falling fast … 5 = rising fast).
    /// Anything else, including a missing arrow, is `Unknown`.
    pub fn from_arrow(code: Option<u8>) -> Self {
        match code {
            Some(1) => Trend::FallingFast,
            Some(2) => Trend::Falling,
            Some(3) => Trend::Stable,
            Some(4) => Trend::Rising,
            Some(5) => Trend::RisingFast,
            _ => Trend::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::RisingFast  => "rising-fast",
            Trend::Rising      => "rising",
            Trend::Stable      => "stable",
            Trend::Falling     => "falling",
            Trend::FallingFast => "falling-fast",
            Trend::Unknown     => "unknown",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single point-in-time glucose measurement. Never mutated after the
/// upstream client produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Concentration in mmol/L.
    pub value: f64,
    pub trend: Trend,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: f64, trend: Trend, timestamp: DateTime<Utc>) -> Self {
        Self { value, trend, timestamp }
    }

    #[inline]
    pub fn value_mg_dl(&self) -> i64 {
        mmol_to_mgdl(self.value)
    }
}

/// mmol/L → mg/dL, rounded half-to-even.
#[inline]
pub fn mmol_to_mgdl(mmol: f64) -> i64 {
    (mmol * 18.0).round_ties_even() as i64
}

/// mg/dL → mmol/L with one decimal, the precision the sensor apps display.
#[inline]
pub fn mgdl_to_mmol(mgdl: f64) -> f64 {
    (mgdl / 18.0 * 10.0).round() / 10.0
}

// ─── Projections ──────────────────────────────────────────────────────────────

/// Body of `GET /glucose/latest`.
///
/// `stale` and the deadline markers are only present when the coordinator had
/// to fall back to a cached reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPayload {
    pub value_mmol_l: f64,
    pub value_mg_dl:  i64,
    pub trend:        Trend,
    pub timestamp:    DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttled_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
}

impl From<&Reading> for LatestPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            value_mmol_l:    reading.value,
            value_mg_dl:     reading.value_mg_dl(),
            trend:           reading.trend,
            timestamp:       reading.timestamp,
            stale:           None,
            throttled_until: None,
            backoff_until:   None,
        }
    }
}

/// One entry of `GET /glucose/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub mmol:      f64,
    pub mgdl:      i64,
    pub trend:     Trend,
}

impl From<&Reading> for HistoryPoint {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            mmol:      reading.value,
            mgdl:      reading.value_mg_dl(),
            trend:     reading.trend,
        }
    }
}
