//! # ledger — Dose Event Ledger
//!
//! Append / query / delete log of insulin doses. Independent of the glucose
//! pipeline. Access control lives in [`crate::auth`].
//!
//! ## Backends
//! - **Memory**: always available. With `EVENTS_PATH` set, every mutation
//!   rewrites the JSON file (write to `*.tmp`, then rename).
//! - **Postgres**: `cargo run --features postgres` with `DATABASE_URL` set.

use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Event, EventFilter};

enum Backend {
    Memory {
        events: RwLock<HashMap<Uuid, Event>>,
        path:   Option<PathBuf>,
    },
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
}

pub struct EventLedger {
    backend: Backend,
}

impl EventLedger {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory { events: RwLock::new(HashMap::new()), path: None },
        }
    }

    /// Loads `path` if it exists; the file is created on the first append.
    pub async fn open_file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let events = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<Event>>(&bytes)
                .with_context(|| format!("Failed to parse event ledger {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read event ledger {}", path.display()));
            }
        };

        info!(path = %path.display(), count = events.len(), "Event ledger loaded");
        Ok(Self {
            backend: Backend::Memory {
                events: RwLock::new(events.into_iter().map(|e| (e.id, e)).collect()),
                path:   Some(path),
            },
        })
    }

    #[cfg(feature = "postgres")]
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = crate::db::init_pool(database_url).await?;
        Ok(Self { backend: Backend::Postgres(pool) })
    }

    /// Picks the backend the configuration asks for.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        #[cfg(feature = "postgres")]
        {
            if let Some(url) = &config.database_url {
                return Self::connect(url).await;
            }
        }
        #[cfg(not(feature = "postgres"))]
        {
            if config.database_url.is_some() {
                warn!("DATABASE_URL is set but the postgres feature is disabled, ignoring it");
            }
        }

        match &config.events_path {
            Some(path) => Self::open_file(path.clone()).await,
            None => {
                warn!("EVENTS_PATH not set — dose events are kept in memory only");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Memory { path: Some(_), .. } => "file",
            Backend::Memory { path: None, .. } => "memory",
            #[cfg(feature = "postgres")]
            Backend::Postgres(_) => "postgres",
        }
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    pub async fn append(&self, event: Event) -> anyhow::Result<Event> {
        match &self.backend {
            Backend::Memory { events, path } => {
                let mut guard = events.write().await;
                guard.insert(event.id, event.clone());
                if let Err(e) = persist(path.as_ref(), &guard).await {
                    guard.remove(&event.id);
                    return Err(e);
                }
            }
            #[cfg(feature = "postgres")]
            Backend::Postgres(pool) => crate::db::insert_event(pool, &event).await?,
        }

        info!(id = %event.id, kind = event.kind.as_str(), dose = event.dose, "💉 Dose event recorded");
        Ok(event)
    }

    /// Events matching `filter`, newest first, at most `filter.limit`.
    pub async fn query(&self, filter: &EventFilter) -> anyhow::Result<Vec<Event>> {
        match &self.backend {
            Backend::Memory { events, .. } => {
                let guard = events.read().await;
                let mut found: Vec<Event> = guard.values().filter(|e| filter.matches(e)).cloned().collect();
                found.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| a.id.cmp(&b.id)));
                found.truncate(filter.limit);
                Ok(found)
            }
            #[cfg(feature = "postgres")]
            Backend::Postgres(pool) => crate::db::query_events(pool, filter).await,
        }
    }

    /// `false` when no event has this id.
    pub async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = match &self.backend {
            Backend::Memory { events, path } => {
                let mut guard = events.write().await;
                match guard.remove(&id) {
                    Some(event) => {
                        if let Err(e) = persist(path.as_ref(), &guard).await {
                            guard.insert(id, event);
                            return Err(e);
                        }
                        true
                    }
                    None => false,
                }
            }
            #[cfg(feature = "postgres")]
            Backend::Postgres(pool) => crate::db::delete_event(pool, id).await?,
        };

        if removed {
            info!(%id, "Dose event deleted");
        }
        Ok(removed)
    }
}

async fn persist(path: Option<&PathBuf>, events: &HashMap<Uuid, Event>) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    let mut all: Vec<&Event> = events.values().collect();
    all.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
    let bytes = serde_json::to_vec_pretty(&all).context("Failed to serialise event ledger")?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
