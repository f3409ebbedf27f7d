//! # glucose-relay — HTTP server
//!
//! ## Environment Variables
//!
//! See [`glucose_relay::config`] for the full table. The essentials:
//!
//! | Variable          | Default          | Description                   |
//! |-------------------|------------------|-------------------------------|
//! | `BIND_ADDR`       | `0.0.0.0:8000`   | Address axum listens on       |
//! | `LIBRE_EMAIL`     | —                | LibreLinkUp follower account  |
//! | `LIBRE_PASSWORD`  | —                | LibreLinkUp password          |
//! | `EVENTS_TOKEN`    | —                | Secret for `/events*`         |
//! | `RUST_LOG`        | `glucose_relay=debug` | Tracing filter           |

use std::sync::Arc;

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glucose_relay::{
    ledger::EventLedger,
    routes,
    state::build_state,
    upstream::LibreLinkUpClient,
    Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("glucose_relay=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    // ── 3. Config ─────────────────────────────────────────────────────────────
    let config = Config::from_env().context("Failed to load config")?;
    if config.credentials().is_none() {
        warn!("LIBRE_EMAIL / LIBRE_PASSWORD not set, glucose endpoints will fail until configured");
    }
    if config.events_token.is_none() {
        warn!("EVENTS_TOKEN not set — /events is locked");
    }

    info!(
        region       = %config.region,
        ttl_secs     = config.cache_ttl_secs,
        min_interval = config.min_fetch_interval_secs,
        backoff_secs = config.backoff_after_429_secs,
        "Glucose relay configured"
    );

    // ── 4. Shared state ───────────────────────────────────────────────────────
    let source = Arc::new(LibreLinkUpClient::new(&config)?);
    let ledger = EventLedger::from_config(&config).await?;
    let addr = config.bind_addr;
    let state = build_state(config, source, ledger);

    // ── 5. CORS — browser prototypes call us directly ─────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ── 6. Router ─────────────────────────────────────────────────────────────
    let app = routes::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    // ── 7. Bind & Serve ───────────────────────────────────────────────────────
    info!(?addr, "🚀 Glucose relay starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
