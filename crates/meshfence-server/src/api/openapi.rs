//! OpenAPI specification generation for the meshfence API.
//!
//! The document is served at `/api/openapi.json` and written to the workspace
//! root by the `gen-openapi` binary for dashboard client generation.

use axum::Json;
use meshfence_core::{
    ConfigPatch, Configuration, DispatchRecord, EngineSnapshot, FieldChange, Geofence, NodeView,
    NotificationEvent, PositionSample, ProposalReport, SourceStatus,
};
use utoipa::OpenApi;

use super::config::ConfigResponse;
use super::error::{ErrorResponse, Violation};
use super::health::{EngineHealth, HealthResponse};
use super::positions::IngestResponse;
use super::status::StatusResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for meshfence.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "meshfence API",
        version = "0.1.0",
        description = r#"
# meshfence API

meshfence watches the positions of nodes on a low-power mesh network and
broadcasts a text notification when something worth knowing happens.

## Overview

This API runs on the gateway node and provides:

1. **Status**: Every tracked node with its position, geofence membership,
   distance to the local node and motion state
2. **Positions**: Submit samples alongside the GPS and mesh producers
3. **Configuration**: Edit geofences and thresholds without restarting

## Notifications

- **enter / exit**: A node crossed a geofence boundary. The boundary counts as inside.
- **distance_threshold**: A node's distance to the local node moved by more than the threshold.
- **stationary / moving_again**: A node stopped moving, or started again.

Repeats of the same notification for the same node are suppressed for one
evaluation period.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local meshfence server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "status",
            description = "Dashboard snapshot of tracked nodes, sources and recent notifications"
        ),
        (
            name = "positions",
            description = "Position sample ingestion"
        ),
        (
            name = "config",
            description = "Geofences, thresholds, timer periods and transport settings"
        )
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::positions::ingest_position,
        super::config::get_config,
        super::config::update_config,
    ),
    components(
        schemas(
            ErrorResponse,
            Violation,
            HealthResponse,
            EngineHealth,
            StatusResponse,
            EngineSnapshot,
            NodeView,
            SourceStatus,
            DispatchRecord,
            NotificationEvent,
            PositionSample,
            IngestResponse,
            ConfigResponse,
            Configuration,
            Geofence,
            ConfigPatch,
            ProposalReport,
            FieldChange,
        )
    )
)]
pub struct ApiDoc;
