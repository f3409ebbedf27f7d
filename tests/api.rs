//! Router-level tests: real axum router, scripted upstream, manual clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use glucose_relay::{
    clock::ManualClock,
    ledger::EventLedger,
    models::{Reading, Trend},
    routes,
    upstream::{GlucoseSource, UpstreamError},
    AppState, Config,
};

const TOKEN: &str = "test-secret";

// ─── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeUpstream {
    latest:        Mutex<VecDeque<Result<Reading, UpstreamError>>>,
    history:       Mutex<Option<Result<Vec<Reading>, UpstreamError>>>,
    latest_calls:  AtomicUsize,
    latest_delay:  Option<StdDuration>,
}

impl FakeUpstream {
    fn with_latest(answers: Vec<Result<Reading, UpstreamError>>) -> Self {
        Self { latest: Mutex::new(answers.into()), ..Default::default() }
    }

    fn with_history(series: Result<Vec<Reading>, UpstreamError>) -> Self {
        Self { history: Mutex::new(Some(series)), ..Default::default() }
    }

    fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GlucoseSource for FakeUpstream {
    async fn latest(&self) -> Result<Reading, UpstreamError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.latest_delay {
            tokio::time::sleep(delay).await;
        }
        self.latest
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(UpstreamError::Transient("no scripted answer".into())))
    }

    async fn history(&self) -> Result<Vec<Reading>, UpstreamError> {
        self.history.lock().unwrap().clone().unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
}

fn config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("LIBRE_EMAIL".to_string(), "follower@example.com".to_string()),
        ("LIBRE_PASSWORD".to_string(), "pw".to_string()),
        ("CACHE_TTL_SEC".to_string(), "60".to_string()),
        ("MIN_FETCH_INTERVAL_SEC".to_string(), "60".to_string()),
        ("BACKOFF_AFTER_429_SEC".to_string(), "240".to_string()),
        ("HISTORY_MAX_POINTS".to_string(), "1000".to_string()),
        ("EVENTS_TOKEN".to_string(), TOKEN.to_string()),
    ]);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn app(config: Config, upstream: Arc<FakeUpstream>, clock: Arc<ManualClock>) -> Router {
    let state = Arc::new(AppState::new(config, upstream, EventLedger::in_memory(), clock));
    routes::router(state)
}

async fn call(app: &Router, method: Method, uri: &str, auth: bool, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, false, None).await
}

// ─── /glucose/latest ──────────────────────────────────────────────────────────

#[tokio::test]
async fn latest_walks_through_fresh_backoff_and_stale() {
    let upstream = Arc::new(FakeUpstream::with_latest(vec![
        Ok(Reading::new(5.5, Trend::Stable, t0())),
        Err(UpstreamError::RateLimited),
    ]));
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), upstream.clone(), clock.clone());

    let (status, fetched) = get(&app, "/glucose/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["value_mmol_l"], 5.5);
    assert_eq!(fetched["value_mg_dl"], 99);
    assert_eq!(fetched["trend"], "stable");
    assert!(fetched.get("stale").is_none());

    clock.advance_secs(30);
    let (_, cached) = get(&app, "/glucose/latest").await;
    assert_eq!(cached, fetched);

    clock.advance_secs(31); // t = 61 → upstream 429
    let (status, limited) = get(&app, "/glucose/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(limited["stale"], true);

    clock.advance_secs(29); // t = 90
    let (status, stale) = get(&app, "/glucose/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stale["value_mmol_l"], 5.5);
    assert_eq!(stale["stale"], true);

    let backoff_until: DateTime<Utc> = serde_json::from_value(stale["backoff_until"].clone()).unwrap();
    assert_eq!(backoff_until, t0() + Duration::seconds(61 + 240));
    assert_eq!(upstream.latest_calls(), 2);
}

#[tokio::test]
async fn latest_cold_start_errors_are_visible() {
    let clock = Arc::new(ManualClock::new(t0()));

    let limited = Arc::new(FakeUpstream::with_latest(vec![Err(UpstreamError::RateLimited)]));
    let (status, body) = get(&app(config(&[]), limited, clock.clone()), "/glucose/latest").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["ok"], false);
    assert!(body["retry_at"].is_string());

    let down = Arc::new(FakeUpstream::with_latest(vec![Err(UpstreamError::Transient("timeout".into()))]));
    let (status, body) = get(&app(config(&[]), down, clock.clone()), "/glucose/latest").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ok"], false);

    let unconfigured = Arc::new(FakeUpstream::with_latest(vec![Err(UpstreamError::NotConfigured)]));
    let (status, body) = get(&app(config(&[]), unconfigured, clock.clone()), "/glucose/latest").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("LIBRE_EMAIL"));

    let lonely = Arc::new(FakeUpstream::with_latest(vec![Err(UpstreamError::NoPatients)]));
    let (status, _) = get(&app(config(&[]), lonely, clock.clone()), "/glucose/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let refused = Arc::new(FakeUpstream::with_latest(vec![Err(UpstreamError::Auth("login refused".into()))]));
    let (status, _) = get(&app(config(&[]), refused, clock), "/glucose/latest").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn latest_concurrent_cold_callers_share_one_fetch() {
    let upstream = Arc::new(FakeUpstream {
        latest_delay: Some(StdDuration::from_millis(50)),
        ..FakeUpstream::with_latest(vec![Ok(Reading::new(6.2, Trend::Rising, t0()))])
    });
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), upstream.clone(), clock);

    let calls = (0..12).map(|_| {
        let app = app.clone();
        async move { get(&app, "/glucose/latest").await }
    });
    let results = futures_util::future::join_all(calls).await;

    for (status, body) in results {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value_mmol_l"], 6.2);
        assert!(body.get("stale").is_none());
    }
    assert_eq!(upstream.latest_calls(), 1);
}

// ─── /glucose/history ─────────────────────────────────────────────────────────

#[tokio::test]
async fn history_filters_sorts_and_decimates() {
    let now = t0();
    // 300 points, 5 minutes apart, newest first: spans 25 hours
    let series: Vec<Reading> = (0..300)
        .map(|i| Reading::new(5.0, Trend::Unknown, now - Duration::minutes(5 * i)))
        .collect();
    let upstream = Arc::new(FakeUpstream::with_history(Ok(series)));
    let clock = Arc::new(ManualClock::new(now));
    let app = app(config(&[("HISTORY_MAX_POINTS", "100")]), upstream, clock);

    let (status, body) = get(&app, "/glucose/history?hours=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hours"], 2);
    assert_eq!(body["count"], 25); // minutes 0, 5, …, 120

    let (_, body) = get(&app, "/glucose/history").await;
    assert_eq!(body["hours"], 24);
    // 289 points in 24h, stride 289 / 100 = 2 → 145
    assert_eq!(body["count"], 145);

    let points = body["points"].as_array().unwrap();
    assert_eq!(points.len(), 145);
    assert_eq!(points[0]["mgdl"], 90);
    assert_eq!(points[0]["trend"], "unknown");
    let stamps: Vec<DateTime<Utc>> = points
        .iter()
        .map(|p| serde_json::from_value(p["timestamp"].clone()).unwrap())
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn history_rejects_out_of_range_hours() {
    let upstream = Arc::new(FakeUpstream::with_history(Ok(Vec::new())));
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), upstream, clock);

    for uri in ["/glucose/history?hours=0", "/glucose/history?hours=169", "/glucose/history?hours=abc"] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        assert_eq!(body["ok"], false);
    }
}

#[tokio::test]
async fn history_surfaces_upstream_errors() {
    let upstream = Arc::new(FakeUpstream::with_history(Err(UpstreamError::RateLimited)));
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), upstream, clock);

    let (status, _) = get(&app, "/glucose/history").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

// ─── /events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_create_list_delete() {
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), Arc::new(FakeUpstream::default()), clock);

    let (status, _) = call(&app, Method::POST, "/events", true, Some(json!({ "type": "snack", "dose": 5 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, Method::POST, "/events", true, Some(json!({ "type": "bolus", "dose": "5" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, created) = call(&app, Method::POST, "/events", true, Some(json!({ "type": "bolus", "dose": 5 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["ok"], true);
    assert_eq!(created["event"]["type"], "bolus");
    assert_eq!(created["event"]["dose"], 5);
    let id = created["event"]["id"].as_str().unwrap().to_string();
    let ts: DateTime<Utc> = serde_json::from_value(created["event"]["ts"].clone()).unwrap();
    assert_eq!(ts, t0());

    let (status, _) = call(
        &app,
        Method::POST,
        "/events",
        true,
        Some(json!({ "type": "basal", "dose": 14, "timestamp": "2026-10-18T22:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, listed) = call(&app, Method::GET, "/events", true, None).await;
    assert_eq!(status, StatusCode::OK);
    let events = listed["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], id.as_str()); // newest first
    assert_eq!(events[1]["type"], "basal");

    let (_, since) = call(&app, Method::GET, "/events?since=2026-10-19T00:00:00Z", true, None).await;
    assert_eq!(since["events"].as_array().unwrap().len(), 1);

    let (status, deleted) = call(&app, Method::DELETE, &format!("/events/{id}"), true, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], id.as_str());

    let (status, _) = call(&app, Method::DELETE, &format!("/events/{id}"), true, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::DELETE, "/events/not-a-uuid", true, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_limit_bounds() {
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), Arc::new(FakeUpstream::default()), clock);

    for uri in ["/events?limit=0", "/events?limit=5001"] {
        let (status, _) = call(&app, Method::GET, uri, true, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
    }
    let (status, _) = call(&app, Method::GET, "/events?limit=5000", true, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn events_require_token() {
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), Arc::new(FakeUpstream::default()), clock.clone());

    let (status, body) = call(&app, Method::GET, "/events", false, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);

    let (status, _) = call(&app, Method::POST, "/events", false, Some(json!({ "type": "bolus", "dose": 5 }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&app, "/events?token=wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&app, &format!("/events?token={TOKEN}")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn events_locked_without_configured_secret() {
    let mut locked = config(&[]);
    locked.events_token = None;
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(locked, Arc::new(FakeUpstream::default()), clock);

    let (status, _) = call(&app, Method::GET, "/events", true, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::DELETE, &format!("/events/{}", uuid::Uuid::new_v4()), true, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ─── /health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_echoes_configuration() {
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(
        config(&[("LIBRE_REGION", "eu2"), ("CACHE_TTL_SEC", "45")]),
        Arc::new(FakeUpstream::default()),
        clock,
    );

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["region"], "EU2");
    assert_eq!(body["cache_ttl_sec"], 45);
    assert_eq!(body["min_fetch_interval_sec"], 60);
    assert_eq!(body["backoff_after_429_sec"], 240);
    assert_eq!(body["events_enabled"], true);
    assert!(body["cache"]["cached_at"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_answers_while_latest_fetch_is_in_flight() {
    let upstream = Arc::new(FakeUpstream {
        latest_delay: Some(StdDuration::from_secs(3)),
        ..FakeUpstream::with_latest(vec![Ok(Reading::new(5.5, Trend::Stable, t0()))])
    });
    let clock = Arc::new(ManualClock::new(t0()));
    let app = app(config(&[]), upstream.clone(), clock);

    let slow = {
        let app = app.clone();
        tokio::spawn(async move { get(&app, "/glucose/latest").await })
    };
    while upstream.latest_calls() == 0 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    let (status, body) = tokio::time::timeout(StdDuration::from_secs(1), get(&app, "/health"))
        .await
        .expect("/health queued behind the upstream fetch");
    assert_eq!(status, StatusCode::OK);
    assert!(body["cache"]["cached_at"].is_null());

    let (status, _) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}
