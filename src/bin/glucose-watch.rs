//! # glucose-watch — console poller
//!
//! Polls LibreLinkUp directly and logs a line whenever a newer reading shows
//! up. The sensor produces a new sample about once a minute, so the default
//! 30 s poll never misses one.
//!
//! ## Flow
//! ```text
//! login (+ redirect) → first shared patient
//! loop every POLL_SECONDS:
//!   latest reading → newer than last seen? → log
//!   any error      → drop session, log in again next cycle
//! ```

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glucose_relay::{
    models::mmol_to_mgdl,
    upstream::{LibreLinkUpClient, UpstreamError},
    Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env()
            .add_directive("glucose_watch=info".parse()?)
            .add_directive("glucose_relay=info".parse()?)
            .add_directive("reqwest=warn".parse()?))
        .init();

    let config = Config::from_env().context("Failed to load config")?;
    if config.credentials().is_none() {
        bail!("LIBRE_EMAIL / LIBRE_PASSWORD missing — set them in .env");
    }

    let client = LibreLinkUpClient::new(&config)?;

    // Fail fast on problems a retry will not fix.
    let session = client.authenticate().await.context("LibreLinkUp login failed")?;
    let patient = client
        .list_patients(&session)
        .await?
        .into_iter()
        .next()
        .context("No patients found in LibreLinkUp — share data with this account in the app")?;

    info!(
        region   = %session.region,
        patient  = %patient,
        interval = ?config.poll_interval,
        "👀 Watching glucose"
    );

    let mut last_seen: Option<DateTime<Utc>> = None;
    let mut session = Some(session);

    // ── Poll Loop ─────────────────────────────────────────────────────────────
    loop {
        let current = match session.take() {
            Some(s) => Ok(s),
            None => client.authenticate().await,
        };

        match current {
            Ok(s) => match client.latest_for(&s, &patient).await {
                Ok(reading) => {
                    if last_seen.map_or(true, |ts| reading.timestamp > ts) {
                        last_seen = Some(reading.timestamp);
                        info!(
                            at    = %reading.timestamp,
                            mmol  = %format!("{:.1}", reading.value),
                            mgdl  = mmol_to_mgdl(reading.value),
                            trend = %reading.trend,
                            "🩸 New reading"
                        );
                    }
                    session = Some(s);
                }
                Err(UpstreamError::RateLimited) => {
                    warn!("Upstream rate limited — keeping session, waiting for next cycle");
                    session = Some(s);
                }
                Err(e) => {
                    warn!(error = %e, "Poll failed — will log in again next cycle");
                }
            },
            Err(e) => {
                error!(error = %e, "Re-login failed — retrying next cycle");
            }
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}
