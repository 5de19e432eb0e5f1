//! `GET /health`: liveness of the engine and its position sources.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Engine liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineHealth {
    /// Timers running, every open source connected.
    Ok,
    /// Timers running, at least one open source disconnected.
    Degraded,
    /// Shutdown has begun.
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "config_version": 3,
    "tracked_nodes": 4,
    "disconnected_sources": []
}))]
pub struct HealthResponse {
    pub status: EngineHealth,

    /// Server build version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Configuration version the timers are running with.
    #[schema(example = 3)]
    pub config_version: u64,

    /// Nodes currently in the registry, including the local node.
    #[schema(example = 4)]
    pub tracked_nodes: usize,

    /// Names of open sources whose last interaction failed.
    pub disconnected_sources: Vec<String>,
}

pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Engine liveness",
    description = "Reports `stopping` once shutdown has begun and `degraded` while an \
        open position source is disconnected. Always answers 200 so a watchdog can \
        tell a slow engine from a dead process.",
    responses(
        (status = 200, description = "Engine liveness", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let engine = state.engine();
    let snapshot = engine.snapshot().await;

    let disconnected_sources: Vec<String> = snapshot
        .sources
        .iter()
        .filter(|source| !source.closed && !source.connected)
        .map(|source| source.name.clone())
        .collect();

    let status = if engine.is_stopped() {
        EngineHealth::Stopping
    } else if disconnected_sources.is_empty() {
        EngineHealth::Ok
    } else {
        EngineHealth::Degraded
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_version: snapshot.config_version,
        tracked_nodes: snapshot.nodes.len(),
        disconnected_sources,
    })
}
