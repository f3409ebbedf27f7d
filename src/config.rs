//! # config — read configuration from environment variables
//!
//! `.env` is loaded by the binaries before [`Config::from_env`] runs.
//!
//! | Variable                 | Default         | Description                              |
//! |--------------------------|-----------------|------------------------------------------|
//! | `BIND_ADDR`              | `0.0.0.0:8000`  | Address axum listens on                  |
//! | `LIBRE_EMAIL`            | —               | LibreLinkUp follower account             |
//! | `LIBRE_PASSWORD`         | —               | LibreLinkUp password                     |
//! | `LIBRE_REGION`           | `EU`            | EU, EU2, US, DE, FR, JP, AP, AU, AE, CA, LA, RU, GLOBAL |
//! | `LIBRE_CLIENT_VERSION`   | `4.12.0`        | `version` header sent upstream           |
//! | `LIBRE_BASE_URL`         | —               | Replaces the region's API host (stubs, proxies) |
//! | `UPSTREAM_TIMEOUT_SEC`   | `10`            | Per-request upstream timeout             |
//! | `CACHE_TTL_SEC`          | `60`            | Reuse window for the latest reading      |
//! | `MIN_FETCH_INTERVAL_SEC` | `60`            | Minimum spacing of upstream fetches      |
//! | `BACKOFF_AFTER_429_SEC`  | `240`           | Cooldown after an upstream 429           |
//! | `HISTORY_MAX_POINTS`     | `1000`          | Decimation cap for `/glucose/history`, at least 1 |
//!
//! The three `*_SEC` windows are capped at [`MAX_WINDOW_SECS`] (one week).
//! | `EVENTS_PATH`            | —               | JSON file backing the dose ledger        |
//! | `DATABASE_URL`           | —               | Postgres ledger (`postgres` feature)     |
//! | `EVENTS_TOKEN`           | —               | Ledger secret — unset means locked       |
//! | `POLL_SECONDS`           | `30`            | `glucose-watch` poll interval            |

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

use crate::upstream::Region;

/// Upper bound for the cache, throttle and backoff windows.
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:      SocketAddr,

    // ── Upstream ──────────────────────────────────────────────────────────────
    pub libre_email:    Option<String>,
    pub libre_password: Option<String>,
    pub region:         Region,
    pub client_version: String,
    /// Overrides [`Region::base_url`] for every region when set.
    pub upstream_base_url: Option<String>,
    pub upstream_timeout: Duration,

    // ── Fetch coordination ────────────────────────────────────────────────────
    pub cache_ttl_secs:          u64,
    pub min_fetch_interval_secs: u64,
    pub backoff_after_429_secs:  u64,
    pub history_max_points:      usize,

    // ── Event ledger ──────────────────────────────────────────────────────────
    pub events_path:   Option<PathBuf>,
    pub database_url:  Option<String>,
    /// `None` keeps every `/events` route closed.
    pub events_token:  Option<String>,

    // ── Watcher ───────────────────────────────────────────────────────────────
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:8000")?;

        let region = match get("LIBRE_REGION") {
            Some(raw) => raw.parse::<Region>()?,
            None => Region::Eu,
        };

        Ok(Self {
            bind_addr,
            libre_email:             get("LIBRE_EMAIL"),
            libre_password:          get("LIBRE_PASSWORD"),
            region,
            client_version:          get("LIBRE_CLIENT_VERSION").unwrap_or_else(|| "4.12.0".to_string()),
            upstream_base_url:       get("LIBRE_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            upstream_timeout:        Duration::from_secs(parse_or(&get, "UPSTREAM_TIMEOUT_SEC", 10)?),
            cache_ttl_secs:          window_secs(&get, "CACHE_TTL_SEC", 60)?,
            min_fetch_interval_secs: window_secs(&get, "MIN_FETCH_INTERVAL_SEC", 60)?,
            backoff_after_429_secs:  window_secs(&get, "BACKOFF_AFTER_429_SEC", 240)?,
            history_max_points:      history_max_points(&get)?,
            events_path:             get("EVENTS_PATH").map(PathBuf::from),
            database_url:            get("DATABASE_URL"),
            events_token:            get("EVENTS_TOKEN"),
            poll_interval:           Duration::from_secs(parse_or(&get, "POLL_SECONDS", 30)?),
        })
    }

    /// Both upstream credentials, or `None` when either is missing.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.libre_email, &self.libre_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key} must be a number, got '{raw}'")),
        None => Ok(default),
    }
}

fn window_secs<G>(get: &G, key: &str, default: u64) -> anyhow::Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_or(get, key, default)?;
    if secs > MAX_WINDOW_SECS {
        return Err(anyhow::anyhow!("{secs} exceeds the {MAX_WINDOW_SECS} s ceiling"))
            .with_context(|| format!("{key} is out of range"));
    }
    Ok(secs)
}

fn history_max_points<G>(get: &G) -> anyhow::Result<usize>
where
    G: Fn(&str) -> Option<String>,
{
    let points = parse_or(get, "HISTORY_MAX_POINTS", 1000)?;
    if points == 0 {
        return Err(anyhow::anyhow!("a window needs at least one point"))
            .context("HISTORY_MAX_POINTS must be at least 1");
    }
    Ok(points)
}
