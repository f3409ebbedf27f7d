//! # db — PostgreSQL backend for the dose ledger
//!
//! Enabled with the `postgres` feature.
//!
//! ## Setup
//! 1. Create a PostgreSQL database
//! 2. Set `DATABASE_URL` in `.env`
//! 3. Start the server — `migrations/001_init.sql` is applied on connect

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::{Event, EventFilter, EventKind};

// ─── Pool Init ────────────────────────────────────────────────────────────────

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    pool.execute(include_str!("../migrations/001_init.sql"))
        .await
        .context("Failed to run migration 001_init.sql")?;

    info!("✅ PostgreSQL connected and migrations applied");
    Ok(pool)
}

// ─── Dose Events ──────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct EventRow {
    id:   Uuid,
    kind: String,
    dose: i64,
    ts:   DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> anyhow::Result<Self> {
        let kind = EventKind::parse(&row.kind)
            .with_context(|| format!("unknown event kind '{}' in row {}", row.kind, row.id))?;
        Ok(Event { id: row.id, kind, dose: row.dose, ts: row.ts })
    }
}

pub async fn insert_event(pool: &PgPool, event: &Event) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO dose_events (id, kind, dose, ts) VALUES ($1, $2, $3, $4)")
        .bind(event.id)
        .bind(event.kind.as_str())
        .bind(event.dose)
        .bind(event.ts)
        .execute(pool)
        .await
        .context("insert_event failed")?;

    Ok(())
}

pub async fn query_events(pool: &PgPool, filter: &EventFilter) -> anyhow::Result<Vec<Event>> {
    let rows: Vec<EventRow> = sqlx::query_as(
        r#"
        SELECT id, kind, dose, ts
        FROM dose_events
        WHERE ($1::timestamptz IS NULL OR ts >= $1)
          AND ($2::timestamptz IS NULL OR ts <= $2)
        ORDER BY ts DESC, id
        LIMIT $3
        "#,
    )
    .bind(filter.since)
    .bind(filter.until)
    .bind(filter.limit as i64)
    .fetch_all(pool)
    .await
    .context("query_events failed")?;

    rows.into_iter().map(Event::try_from).collect()
}

/// `false` when no row had this id.
pub async fn delete_event(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM dose_events WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("delete_event failed")?;

    Ok(result.rows_affected() > 0)
}
