//! HTTP server.
//!
//! Exposes the query gateway and the fixed read surfaces over a JSON API
//! for the map front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Natural-language question → rows + generated SQL |
//! | `POST` | `/ingest/backfill` | One backfill pass (`{"days": n}` or `{"hours": n}`) |
//! | `GET`  | `/last-updated` | Newest stored report timestamp |
//! | `GET`  | `/events/recent` | Recent reports grouped by location (`?days=n`) |
//! | `GET`  | `/reports/{id}` | One stored report |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/ping` | Liveness probe |
//!
//! # Identity
//!
//! The upstream auth layer sets `x-atlascope-user` for signed-in users;
//! those requests are authenticated and never touch the quota. Everyone
//! else is identified by the first `x-forwarded-for` entry, falling back
//! to the peer address.
//!
//! Both headers are trusted exactly as received. The server must sit
//! behind a proxy or auth layer that strips any client-sent
//! `x-atlascope-user` and overwrites `x-forwarded-for`; exposed directly,
//! any client can skip the quota or reset it by rotating the header.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "...", "remaining": 0 } }
//! ```
//!
//! Codes: `rate_limited` (429), `generation_error` (502), `fetch_error` (502),
//! `execution_error` (400), `rejected_query` (400), `timeout` (408),
//! `bad_request` (400), `not_found` (404), `internal` (500). Failures after
//! translation also carry the generated `query`.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::{GatewayError, GenerationError};
use crate::gateway::{QueryGateway, QueryResponse};
use crate::ingest::{Ingestor, RunAborted, RunSummary};
use crate::models::{lookback_days, lookback_hours, Report, TimeWindow};
use crate::scheduler::spawn_schedule;
use crate::store::{format_last_updated, format_ts, LocationGroup, ReportStore};

/// Header carrying the signed-in user's id.
pub const USER_HEADER: &str = "x-atlascope-user";

const DEFAULT_RECENT_DAYS: i64 = 7;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    gateway: Arc<QueryGateway>,
    ingestor: Arc<Ingestor>,
}

impl AppState {
    fn store(&self) -> &ReportStore {
        self.ingestor.store()
    }
}

/// Start the server on `[server].bind`, plus the ingestion schedule when
/// `[schedule].enabled` is set. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    let ingestor = Arc::new(Ingestor::from_config(config, pool)?);
    // The read-only pool cannot create the schema (or the WAL index) itself.
    ingestor.store().ensure_schema().await?;
    let read_pool = db::connect_read_only(config).await?;
    let gateway = Arc::new(QueryGateway::from_config(config, read_pool).await?);

    if config.schedule.enabled {
        spawn_schedule(ingestor.clone(), config.schedule.interval());
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        gateway,
        ingestor,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/ingest/backfill", post(handle_backfill))
        .route("/last-updated", get(handle_last_updated))
        .route("/events/recent", get(handle_recent_events))
        .route("/reports/{id}", get(handle_get_report))
        .route("/health", get(handle_health))
        .route("/ping", get(handle_ping))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "atlascope server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// `(identity, is_authenticated)` for a request.
fn resolve_identity(headers: &HeaderMap, peer: SocketAddr) -> (String, bool) {
    if let Some(user) = header_str(headers, USER_HEADER) {
        return (user.to_string(), true);
    }
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match forwarded {
        Some(ip) => (ip.to_string(), false),
        None => (peer.ip().to_string(), false),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u64>,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    query: Option<String>,
    remaining: Option<u64>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            query: None,
            remaining: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                query: self.query,
                remaining: self.remaining,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let (status, code) = match &err {
            GatewayError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            GatewayError::Generation(GenerationError::Timeout(_))
            | GatewayError::ExecutionTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            GatewayError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_error"),
            GatewayError::Rejected { .. } => (StatusCode::BAD_REQUEST, "rejected_query"),
            GatewayError::Execution { .. } => (StatusCode::BAD_REQUEST, "execution_error"),
            GatewayError::Quota(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let remaining = match &err {
            GatewayError::RateLimited { remaining } => Some(*remaining),
            _ => None,
        };
        AppError {
            status,
            code,
            message: err.to_string(),
            query: err.query().map(str::to_string),
            remaining,
        }
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    user_input: String,
}

async fn handle_query(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let user_input = req.user_input.trim();
    if user_input.is_empty() {
        return Err(bad_request("user_input must not be empty"));
    }

    let (identity, authenticated) = resolve_identity(&headers, peer);
    let response = state
        .gateway
        .handle(user_input, &identity, authenticated)
        .await?;
    Ok(Json(response))
}

// ============ POST /ingest/backfill ============

#[derive(Deserialize, Default)]
struct BackfillRequest {
    days: Option<i64>,
    hours: Option<i64>,
}

fn backfill_lookback(req: &BackfillRequest, default_days: i64) -> Result<Duration, AppError> {
    match (req.days, req.hours) {
        (Some(_), Some(_)) => Err(bad_request("pass either days or hours, not both")),
        (Some(d), None) => lookback_days(d).map_err(bad_request),
        (None, Some(h)) => lookback_hours(h).map_err(bad_request),
        (None, None) => lookback_days(default_days).map_err(bad_request),
    }
}

async fn handle_backfill(
    State(state): State<AppState>,
    Json(req): Json<BackfillRequest>,
) -> Result<Json<RunSummary>, AppError> {
    let lookback = backfill_lookback(&req, state.config.feed.backfill_days)?;
    // Detached so a client hanging up does not cancel the run mid-window.
    let run = state
        .ingestor
        .spawn_backfill(lookback)
        .await
        .map_err(|e| internal(e.into()))?;
    match run {
        Ok(summary) => Ok(Json(summary)),
        Err(err) => match err.downcast::<RunAborted>() {
            Ok(aborted) => Err(AppError::new(
                StatusCode::BAD_GATEWAY,
                "fetch_error",
                format!(
                    "{} ({} reports written before the failure)",
                    aborted, aborted.summary.written
                ),
            )),
            Err(err) => Err(internal(err)),
        },
    }
}

// ============ GET /last-updated ============

#[derive(Serialize)]
struct LastUpdatedResponse {
    last_updated: Option<String>,
    display: Option<String>,
}

async fn handle_last_updated(
    State(state): State<AppState>,
) -> Result<Json<LastUpdatedResponse>, AppError> {
    let newest = state.store().last_updated().await.map_err(internal)?;
    Ok(Json(LastUpdatedResponse {
        last_updated: newest.as_ref().map(format_ts),
        display: newest.as_ref().map(format_last_updated),
    }))
}

// ============ GET /events/recent ============

#[derive(Deserialize)]
struct RecentParams {
    days: Option<i64>,
}

#[derive(Serialize)]
struct RecentResponse {
    since: String,
    events: Vec<LocationGroup>,
}

async fn handle_recent_events(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<RecentResponse>, AppError> {
    let lookback = lookback_days(params.days.unwrap_or(DEFAULT_RECENT_DAYS)).map_err(bad_request)?;
    let since = TimeWindow::ending_now(lookback).start;
    let events = state.store().recent_events(since).await.map_err(internal)?;
    Ok(Json(RecentResponse {
        since: format_ts(&since),
        events,
    }))
}

// ============ GET /reports/{id} ============

async fn handle_get_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Report>, AppError> {
    state
        .store()
        .get_report(id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("report not found: {}", id)))
}

// ============ GET /health, /ping ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_ping() -> &'static str {
    "pong"
}
