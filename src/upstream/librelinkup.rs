//! # upstream::librelinkup — LibreLinkUp follower API
//!
//! ## Flow
//! ```text
//! POST /llu/auth/login            → auth ticket  (or redirect → login once more)
//! GET  /llu/connections           → patients sharing with this account
//! GET  /llu/connections/{id}/graph → latest measurement + ~12h of graph points
//! ```
//!
//! The session and first patient are cached. A 401 on a data call drops them
//! and logs in again, once.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{GlucoseSource, Region, UpstreamError};
use crate::config::Config;
use crate::models::{reading::mgdl_to_mmol, Reading, Trend};

const PRODUCT: &str = "llu.android";
const FACTORY_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

// ─── Session ──────────────────────────────────────────────────────────────────

/// An authenticated upstream session, bound to the region that issued it.
#[derive(Debug, Clone)]
pub struct Session {
    pub token:      String,
    /// sha256 of the upstream user id, sent as `Account-Id`.
    pub account_id: String,
    pub region:     Region,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientId(pub String);

impl std::fmt::Display for PatientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
enum Login {
    Ticket(Session),
    Redirect(Region),
}

/// Failure of a single HTTP call. `Expired` only exists so data calls can
/// retry after a fresh login.
#[derive(Debug)]
enum CallError {
    Expired,
    Upstream(UpstreamError),
}

impl CallError {
    fn into_upstream(self) -> UpstreamError {
        match self {
            CallError::Expired => UpstreamError::Auth("session rejected by upstream".to_string()),
            CallError::Upstream(e) => e,
        }
    }
}

impl From<UpstreamError> for CallError {
    fn from(e: UpstreamError) -> Self {
        CallError::Upstream(e)
    }
}

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    status: i64,
    #[serde(default)]
    data:   Option<serde_json::Value>,
    #[serde(default)]
    error:  Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedirectData {
    redirect: bool,
    region:   String,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    user: LoginUser,
    #[serde(rename = "authTicket")]
    auth_ticket: AuthTicket,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AuthTicket {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(rename = "patientId")]
    patient_id: String,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    connection: GraphConnection,
    #[serde(rename = "graphData", default)]
    graph_data: Vec<Measurement>,
}

#[derive(Debug, Deserialize)]
struct GraphConnection {
    #[serde(rename = "glucoseMeasurement")]
    glucose_measurement: Option<Measurement>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    /// UTC, e.g. `10/19/2026 8:15:03 AM`. `Timestamp` is sensor-local time.
    #[serde(rename = "FactoryTimestamp")]
    factory_timestamp: String,
    #[serde(rename = "ValueInMgPerDl")]
    value_mg_dl: f64,
    #[serde(rename = "TrendArrow", default)]
    trend_arrow: Option<u8>,
}

impl Measurement {
    fn to_reading(&self) -> Result<Reading, UpstreamError> {
        let naive = NaiveDateTime::parse_from_str(&self.factory_timestamp, FACTORY_TIMESTAMP_FORMAT)
            .map_err(|e| {
                UpstreamError::Transient(format!(
                    "unparseable FactoryTimestamp '{}': {e}",
                    self.factory_timestamp
                ))
            })?;

        Ok(Reading::new(
            mgdl_to_mmol(self.value_mg_dl),
            Trend::from_arrow(self.trend_arrow),
            DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
        ))
    }
}

/// Unwraps the `{status, data, error}` envelope every endpoint answers with.
fn open_envelope(envelope: Envelope) -> Result<serde_json::Value, UpstreamError> {
    if envelope.status != 0 {
        let message = envelope
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("upstream status {}", envelope.status));
        return Err(match envelope.status {
            2 => UpstreamError::Auth(format!("login refused: {message}")),
            4 => UpstreamError::Auth("account must accept updated terms in the LibreLinkUp app".to_string()),
            _ => UpstreamError::Transient(message),
        });
    }
    envelope
        .data
        .ok_or_else(|| UpstreamError::Transient("upstream response without data".to_string()))
}

fn decode<T: DeserializeOwned>(data: serde_json::Value, what: &str) -> Result<T, UpstreamError> {
    serde_json::from_value(data)
        .map_err(|e| UpstreamError::Transient(format!("unexpected {what} payload: {e}")))
}

fn parse_login(envelope: Envelope, region: Region) -> Result<Login, UpstreamError> {
    let data = open_envelope(envelope)?;

    if let Ok(redirect) = serde_json::from_value::<RedirectData>(data.clone()) {
        if redirect.redirect {
            let target = redirect
                .region
                .parse::<Region>()
                .map_err(|e| UpstreamError::Auth(format!("redirected to {e}")))?;
            return Ok(Login::Redirect(target));
        }
    }

    let ticket: TicketData = decode(data, "login")
        .map_err(|_| UpstreamError::Auth("login response carried no auth ticket".to_string()))?;

    Ok(Login::Ticket(Session {
        token:      ticket.auth_ticket.token,
        account_id: hex::encode(Sha256::digest(ticket.user.id.as_bytes())),
        region,
    }))
}

// ─── Client ───────────────────────────────────────────────────────────────────

pub struct LibreLinkUpClient {
    http:           reqwest::Client,
    email:          Option<String>,
    password:       Option<String>,
    region:         Region,
    /// Replaces every region's host when set.
    base_url:       Option<String>,
    client_version: String,
    /// Session and first shared patient, reused until upstream rejects them.
    connection:     Mutex<Option<(Session, PatientId)>>,
}

impl LibreLinkUpClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_timeout(config, config.upstream_timeout)
    }

    pub fn with_timeout(config: &Config, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            http,
            email:          config.libre_email.clone(),
            password:       config.libre_password.clone(),
            region:         config.region,
            base_url:       config.upstream_base_url.clone(),
            client_version: config.client_version.clone(),
            connection:     Mutex::new(None),
        })
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    /// Logs in, following at most one region redirect.
    pub async fn authenticate(&self) -> Result<Session, UpstreamError> {
        let (email, password) = match (&self.email, &self.password) {
            (Some(e), Some(p)) => (e.as_str(), p.as_str()),
            _ => return Err(UpstreamError::NotConfigured),
        };

        match self.login(self.region, email, password).await? {
            Login::Ticket(session) => Ok(session),
            Login::Redirect(target) => {
                info!(from = %self.region, to = %target, "Upstream redirected login to another region");
                match self.login(target, email, password).await? {
                    Login::Ticket(session) => Ok(session),
                    Login::Redirect(again) => Err(UpstreamError::Auth(format!(
                        "redirect loop: {} → {target} → {again}",
                        self.region
                    ))),
                }
            }
        }
    }

    pub async fn list_patients(&self, session: &Session) -> Result<Vec<PatientId>, UpstreamError> {
        let url = format!("{}/llu/connections", self.host(session.region));
        let data = self
            .fetch_json(self.authed(self.http.get(&url), session))
            .await
            .map_err(CallError::into_upstream)?;

        let connections: Vec<Connection> = decode(data, "connections")?;
        Ok(connections.into_iter().map(|c| PatientId(c.patient_id)).collect())
    }

    pub async fn latest_for(&self, session: &Session, patient: &PatientId) -> Result<Reading, UpstreamError> {
        let graph = self.request_graph(session, patient).await.map_err(CallError::into_upstream)?;
        latest_from_graph(&graph)
    }

    /// Forget the cached session so the next call logs in again.
    pub async fn invalidate_session(&self) {
        *self.connection.lock().await = None;
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    async fn login(&self, region: Region, email: &str, password: &str) -> Result<Login, UpstreamError> {
        let url = format!("{}/llu/auth/login", self.host(region));
        debug!(%region, "Logging in to LibreLinkUp");

        let request = self
            .base_headers(self.http.post(&url))
            .json(&serde_json::json!({ "email": email, "password": password }));

        let envelope = self.send(request).await.map_err(|e| match e {
            CallError::Expired => UpstreamError::Auth("login rejected (HTTP 401)".to_string()),
            CallError::Upstream(e) => e,
        })?;

        parse_login(envelope, region)
    }

    /// Cached session and patient, logging in when there is none.
    async fn connect(&self) -> Result<(Session, PatientId), UpstreamError> {
        let mut guard = self.connection.lock().await;
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }

        let session = self.authenticate().await?;
        let patient = self
            .list_patients(&session)
            .await?
            .into_iter()
            .next()
            .ok_or(UpstreamError::NoPatients)?;

        info!(region = %session.region, patient = %patient, "LibreLinkUp session established");
        *guard = Some((session.clone(), patient.clone()));
        Ok((session, patient))
    }

    async fn graph(&self) -> Result<GraphData, UpstreamError> {
        let (session, patient) = self.connect().await?;
        match self.request_graph(&session, &patient).await {
            Err(CallError::Expired) => {
                warn!("Upstream session expired — logging in again");
                self.invalidate_session().await;
                let (session, patient) = self.connect().await?;
                self.request_graph(&session, &patient).await.map_err(CallError::into_upstream)
            }
            other => other.map_err(CallError::into_upstream),
        }
    }

    async fn request_graph(&self, session: &Session, patient: &PatientId) -> Result<GraphData, CallError> {
        let url = format!("{}/llu/connections/{}/graph", self.host(session.region), patient.0);
        let data = self.fetch_json(self.authed(self.http.get(&url), session)).await?;
        Ok(decode(data, "graph")?)
    }

    async fn fetch_json(&self, request: RequestBuilder) -> Result<serde_json::Value, CallError> {
        let envelope = self.send(request).await?;
        Ok(open_envelope(envelope)?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Envelope, CallError> {
        let resp = request
            .send()
            .await
            .map_err(|e| UpstreamError::Transient(format!("upstream unreachable: {e}")))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(UpstreamError::RateLimited.into()),
            StatusCode::UNAUTHORIZED => return Err(CallError::Expired),
            status if !status.is_success() => {
                return Err(UpstreamError::Transient(format!("upstream HTTP {status}")).into());
            }
            _ => {}
        }

        resp.json::<Envelope>()
            .await
            .map_err(|e| UpstreamError::Transient(format!("unparseable upstream body: {e}")).into())
    }

    fn host(&self, region: Region) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| region.base_url())
    }

    fn base_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("product", PRODUCT)
            .header("version", &self.client_version)
            .header("accept", "application/json")
            .header("cache-control", "no-cache")
    }

    fn authed(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        self.base_headers(request)
            .bearer_auth(&session.token)
            .header("Account-Id", &session.account_id)
    }
}

fn latest_from_graph(graph: &GraphData) -> Result<Reading, UpstreamError> {
    graph
        .connection
        .glucose_measurement
        .as_ref()
        .ok_or_else(|| UpstreamError::Transient("no current measurement on connection".to_string()))?
        .to_reading()
}

fn history_from_graph(graph: &GraphData) -> Result<Vec<Reading>, UpstreamError> {
    graph.graph_data.iter().map(Measurement::to_reading).collect()
}

#[async_trait::async_trait]
impl GlucoseSource for LibreLinkUpClient {
    async fn latest(&self) -> Result<Reading, UpstreamError> {
        latest_from_graph(&self.graph().await?)
    }

    async fn history(&self) -> Result<Vec<Reading>, UpstreamError> {
        history_from_graph(&self.graph().await?)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
