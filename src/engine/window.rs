//! # engine::window
//!
//! Cuts an upstream series down to the requested time window and thins it to a
//! bounded number of points for charting.
//!
//! Thinning is index based: keep every `stride`-th reading, starting with the
//! oldest. It is deliberately not time-bucket averaging.

use chrono::{DateTime, Duration, Utc};

use crate::models::Reading;

/// Stride that brings `n` points under (roughly) `max_points`.
#[inline]
pub fn downsample_stride(n: usize, max_points: usize) -> usize {
    if n <= max_points {
        return 1;
    }
    (n / max_points.max(1)).max(1)
}

/// Readings from the last `hours` before `now`, ascending by timestamp,
/// decimated when there are more than `max_points`.
///
/// `hours` is range-checked by the HTTP layer; this function trusts it.
pub fn build_window(
    mut series: Vec<Reading>,
    hours:      u32,
    max_points: usize,
    now:        DateTime<Utc>,
) -> Vec<Reading> {
    let cutoff = now - Duration::hours(i64::from(hours));

    series.retain(|r| r.timestamp >= cutoff);
    series.sort_by_key(|r| r.timestamp);

    let stride = downsample_stride(series.len(), max_points);
    if stride == 1 {
        return series;
    }

    series.into_iter().step_by(stride).collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
