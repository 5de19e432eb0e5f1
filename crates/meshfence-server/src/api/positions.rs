//! Position ingestion endpoint.
//!
//! Lets gateways and test harnesses push samples into the engine over HTTP,
//! alongside the GPS and mesh producers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use meshfence_core::{IngestOutcome, NodeId, PositionSample};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Result of an accepted sample.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "node_id": "!a1b2c3d4", "created": true }))]
pub struct IngestResponse {
    /// Registry key the sample was stored under.
    pub node_id: NodeId,

    /// Whether this sample created the node.
    pub created: bool,
}

/// Submit a position sample.
#[utoipa::path(
    post,
    path = "/api/positions",
    tag = "positions",
    operation_id = "ingestPosition",
    summary = "Submit a position sample",
    description = "Records a position for a node. Samples from the `local` source are \
        stored under the configured local node id. A sample older than the node's \
        latest position is rejected; one with the same timestamp replaces it.",
    request_body = PositionSample,
    responses(
        (status = 202, description = "Sample recorded", body = IngestResponse),
        (status = 400, description = "Sample is malformed", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Sample is older than the stored position", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Engine is shutting down", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_position(
    State(state): State<SharedState>,
    Json(sample): Json<PositionSample>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    match state.engine().ingest(sample).await {
        IngestOutcome::Accepted { node_id, created } => Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse { node_id, created }),
        )),
        IngestOutcome::Rejected(err) => Err(ApiError::from(err)),
    }
}
