//! Dashboard status endpoint.

use axum::extract::State;
use axum::Json;
use meshfence_core::EngineSnapshot;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Dashboard status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Whether stored restart-only settings differ from the running ones.
    pub restart_pending: bool,

    /// Engine state.
    pub engine: EngineSnapshot,
}

/// Get the dashboard snapshot.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    operation_id = "getStatus",
    summary = "Get engine status",
    description = "Returns every tracked node with its position, geofence membership, \
        distance to the local node and motion state, plus geofence occupancy, \
        position source health and the most recent notifications.",
    responses(
        (status = 200, description = "Current engine snapshot", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let engine = state.engine();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        restart_pending: engine.config().restart_pending().await,
        engine: engine.snapshot().await,
    })
}
