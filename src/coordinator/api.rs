//! REST API handlers for the coordinator
//!
//! Every `?worker=` route authenticates before touching its body. Client
//! errors answer HTTP 400 with `{"status":"error","code":N}`; successful
//! lease mutations answer 204 with no body.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::lease_manager::LeaseError;
use super::registry::RegistryStats;
use super::server::AppState;
use crate::metrics;
use crate::models::{EntityKind, WorkType};
use crate::storage::DatabaseStats;

// ============================================================================
// API Types
// ============================================================================

/// Query string of the `?worker=` routes
#[derive(Debug, Default, Deserialize)]
pub struct WorkerQuery {
    pub worker: Option<String>,
    pub limit: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub store: DatabaseStats,
    pub activity: RegistryStats,
}

fn error_response(route: &str, err: LeaseError) -> Response {
    match err.code() {
        Some(code) => {
            metrics::record_rejection(route, code);
            tracing::debug!(route, code, error = %err, "Rejected request");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "code": code })),
            )
                .into_response()
        }
        None => {
            tracing::error!(route, error = %err, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// Decode a request body; anything that is not JSON becomes `null` and is
/// rejected by the shape checks downstream.
fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/worker", get(new_worker))
        .route(
            "/channels",
            get(|s: State<AppState>, q: Query<WorkerQuery>| assign(WorkType::Channel, s, q))
                .post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                    complete(WorkType::Channel, s, q, b)
                }),
        )
        .route(
            "/videos",
            get(|s: State<AppState>, q: Query<WorkerQuery>| assign(WorkType::Video, s, q))
                .post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                    complete(WorkType::Video, s, q, b)
                }),
        )
        .route(
            "/channels/abort",
            post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                abort(WorkType::Channel, s, q, b)
            }),
        )
        .route(
            "/videos/abort",
            post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                abort(WorkType::Video, s, q, b)
            }),
        )
        .route(
            "/channels/ping",
            post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                ping(WorkType::Channel, s, q, b)
            }),
        )
        .route(
            "/videos/ping",
            post(|s: State<AppState>, q: Query<WorkerQuery>, b: Bytes| {
                ping(WorkType::Video, s, q, b)
            }),
        )
        .route(
            "/channels/submit",
            post(|s: State<AppState>, b: Bytes| submit(EntityKind::Channel, s, b)),
        )
        .route(
            "/videos/submit",
            post(|s: State<AppState>, b: Bytes| submit(EntityKind::Video, s, b)),
        )
        .route(
            "/playlists/submit",
            post(|s: State<AppState>, b: Bytes| submit(EntityKind::Playlist, s, b)),
        )
        .route("/stats", get(stats))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

// ============================================================================
// Worker Handlers
// ============================================================================

/// Issue a new worker token
async fn new_worker(State(state): State<AppState>) -> Response {
    match state.manager.register_worker().await {
        Ok(worker) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "workerID": worker })),
        )
            .into_response(),
        Err(e) => error_response("/worker", e),
    }
}

// ============================================================================
// Lease Handlers
// ============================================================================

async fn assign(
    work_type: WorkType,
    State(state): State<AppState>,
    Query(query): Query<WorkerQuery>,
) -> Response {
    let route = work_type.entity_kind().plural();

    let worker = match state.manager.authenticate(query.worker.as_deref()).await {
        Ok(w) => w,
        Err(e) => return error_response(route, e),
    };

    match state
        .manager
        .assign_batch(work_type, &worker, query.limit.as_deref())
        .await
    {
        Ok(ids) => (
            StatusCode::OK,
            Json(json!({ "status": "success", route: ids })),
        )
            .into_response(),
        Err(e) => error_response(route, e),
    }
}

async fn complete(
    work_type: WorkType,
    State(state): State<AppState>,
    Query(query): Query<WorkerQuery>,
    body: Bytes,
) -> Response {
    let route = work_type.entity_kind().plural();

    let worker = match state.manager.authenticate(query.worker.as_deref()).await {
        Ok(w) => w,
        Err(e) => return error_response(route, e),
    };

    match state
        .manager
        .complete(work_type, &worker, &parse_body(&body))
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(route, e),
    }
}

async fn abort(
    work_type: WorkType,
    State(state): State<AppState>,
    Query(query): Query<WorkerQuery>,
    body: Bytes,
) -> Response {
    let route = work_type.entity_kind().plural();

    let worker = match state.manager.authenticate(query.worker.as_deref()).await {
        Ok(w) => w,
        Err(e) => return error_response(route, e),
    };

    match state.manager.abort(work_type, &worker, &parse_body(&body)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(route, e),
    }
}

async fn ping(
    work_type: WorkType,
    State(state): State<AppState>,
    Query(query): Query<WorkerQuery>,
    body: Bytes,
) -> Response {
    let route = work_type.entity_kind().plural();

    let worker = match state.manager.authenticate(query.worker.as_deref()).await {
        Ok(w) => w,
        Err(e) => return error_response(route, e),
    };

    match state
        .manager
        .heartbeat(work_type, &worker, &parse_body(&body))
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(route, e),
    }
}

// ============================================================================
// Submission Handlers
// ============================================================================

async fn submit(kind: EntityKind, State(state): State<AppState>, body: Bytes) -> Response {
    match state.manager.submit_ids(kind, &parse_body(&body)).await {
        Ok(inserted) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "inserted": inserted })),
        )
            .into_response(),
        Err(e) => error_response(kind.plural(), e),
    }
}

// ============================================================================
// Stats Handlers
// ============================================================================

async fn stats(State(state): State<AppState>) -> Response {
    let store = match state.manager.stats().await {
        Ok(s) => s,
        Err(e) => return error_response("/stats", e),
    };
    let activity = state.manager.registry().stats().await;

    Json(StatsResponse {
        status: "success",
        store,
        activity,
    })
    .into_response()
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus text exposition
async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
