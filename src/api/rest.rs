// =============================================================================
// REST API Endpoints — Axum
// =============================================================================
//
// All endpoints live under `/api/v1/`. Read endpoints return a snapshot of
// the in-memory ledger and market cache without blocking on a cycle; a
// symbol or agent id with no data yet returns 404 rather than a faked
// response. Control endpoints return 409 when they contradict current
// scheduler state.
//
// CORS is permissive, suited to a development posture.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::scheduler::{ControlError, Scheduler};
use crate::services::Services;

/// Axum state for the REST/WS layer: the process-wide `Services` plus the
/// `Scheduler` handle spawned from it. Kept separate from `Services` itself
/// so `Services::build` doesn't need to know about a scheduler it hasn't
/// spawned yet.
#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<Services>,
    pub scheduler: Scheduler,
}

pub fn router(services: Arc<Services>, scheduler: Scheduler) -> Router {
    let state = ApiState { services, scheduler };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/accounts", get(accounts))
        .route("/api/v1/accounts/:agent_id", get(account))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/positions/:agent_id", get(positions_for_agent))
        .route("/api/v1/trades/:agent_id", get(trades_for_agent))
        .route("/api/v1/leaderboard", get(leaderboard))
        .route("/api/v1/market/:symbol", get(market_for_symbol))
        .route("/api/v1/control/trigger", post(control_trigger))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn status(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn accounts(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots: Vec<_> = state
        .services
        .accounts
        .iter()
        .map(|(_, a)| a.snapshot())
        .collect();
    Json(snapshots)
}

async fn account(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    match state.services.accounts.get(&agent_id) {
        Some(account) => Json(account.snapshot()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_body("unknown agent"))).into_response(),
    }
}

async fn positions(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    let positions: Vec<_> = state
        .services
        .accounts
        .iter()
        .flat_map(|(_, a)| a.snapshot().positions)
        .collect();
    Json(positions)
}

async fn positions_for_agent(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    match state.services.accounts.get(&agent_id) {
        Some(account) => Json(account.snapshot().positions).into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_body("unknown agent"))).into_response(),
    }
}

async fn trades_for_agent(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    if state.services.accounts.get(&agent_id).is_none() {
        return (StatusCode::NOT_FOUND, Json(error_body("unknown agent"))).into_response();
    }
    // Closed trades live in the durable store once a cycle finishes with
    // them; there's no dedicated trade-history query yet, so this surfaces
    // the leaderboard's aggregate row for the agent.
    match state.services.store.leaderboard().await {
        Ok(rows) => {
            let row = rows.into_iter().find(|r| r.agent_id == agent_id);
            Json(row).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error_body(&e.to_string())),
        )
            .into_response(),
    }
}

async fn leaderboard(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    match state.services.store.leaderboard().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error_body(&e.to_string())),
        )
            .into_response(),
    }
}

async fn market_for_symbol(
    _auth: AuthBearer,
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let snapshot = state
        .services
        .snapshots
        .snapshot(std::slice::from_ref(&symbol))
        .await;
    match snapshot.get(&symbol) {
        Some(snap) => Json(snap.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(error_body("no market data available for symbol")),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct ControlResponse {
    message: &'static str,
}

async fn control_trigger(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    match state.scheduler.trigger_now().await {
        Ok(()) => Json(ControlResponse {
            message: "cycle triggered",
        })
        .into_response(),
        Err(e) => control_conflict(e),
    }
}

async fn control_pause(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    match state.scheduler.pause().await {
        Ok(()) => Json(ControlResponse { message: "paused" }).into_response(),
        Err(e) => control_conflict(e),
    }
}

async fn control_resume(_auth: AuthBearer, State(state): State<ApiState>) -> impl IntoResponse {
    match state.scheduler.resume().await {
        Ok(()) => Json(ControlResponse { message: "resumed" }).into_response(),
        Err(e) => control_conflict(e),
    }
}

fn control_conflict(err: ControlError) -> axum::response::Response {
    (StatusCode::CONFLICT, Json(error_body(&err.to_string()))).into_response()
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}
