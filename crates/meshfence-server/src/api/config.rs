//! Configuration API endpoints.
//!
//! Reading returns the stored configuration with the channel PSK masked.
//! Edits are full or partial documents merged over the stored configuration, validated
//! as a whole, published to the engine and written back to disk.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use meshfence_core::{ConfigPatch, Configuration, ProposalReport, REDACTED_PSK};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the config router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_config).put(update_config))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current configuration response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfigResponse {
    /// Version of the configuration snapshot in effect.
    #[schema(example = 3)]
    pub version: u64,

    /// Whether stored restart-only settings differ from the running ones.
    #[schema(example = false)]
    pub restart_pending: bool,

    /// Stored configuration, PSK masked.
    pub config: Configuration,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get current configuration",
    description = "Returns the stored configuration: geofences, timer periods, \
        stationary and distance thresholds, node lifecycle windows, channel policy \
        and transport settings. Transport settings may be ahead of the running \
        values when `restart_pending` is true.",
    responses(
        (status = 200, description = "Configuration retrieved", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    let manager = state.engine().config();
    let stored = manager.stored().await;

    Json(ConfigResponse {
        version: manager.current().version,
        restart_pending: manager.restart_pending().await,
        config: stored.redacted(),
    })
}

/// Update configuration.
#[utoipa::path(
    put,
    path = "/api/config",
    tag = "config",
    operation_id = "updateConfig",
    summary = "Update configuration",
    description = "Accepts a full or partial configuration document and merges the \
        given fields over the stored configuration. The merged \
        document is validated as a whole; on failure nothing changes and every \
        violation is reported. Geofences, thresholds and timer periods take effect \
        on the next tick. Transport settings are saved but only take effect after \
        a restart. A 500 `CONFIG_NOT_SAVED` means the edit is live but was not \
        written to disk.",
    request_body = ConfigPatch,
    responses(
        (status = 200, description = "Configuration accepted", body = ProposalReport),
        (status = 400, description = "Malformed request body", body = crate::api::error::ErrorResponse),
        (status = 422, description = "Validation failed", body = crate::api::error::ErrorResponse),
        (status = 500, description = "Configuration applied to the running engine but not written to disk", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_config(
    State(state): State<SharedState>,
    Json(mut patch): Json<ConfigPatch>,
) -> ApiResult<Json<ProposalReport>> {
    // A document read back from GET carries the masked PSK; keep the stored one.
    if let Some(transport) = patch.transport.as_mut() {
        if transport.private_channel_psk.as_deref() == Some(REDACTED_PSK) {
            transport.private_channel_psk = None;
        }
    }

    let report = state.engine().config().apply_patch(patch).await?;

    if !report.changes.is_empty() {
        state
            .persist_config()
            .await
            .map_err(|e| ApiError::InternalError {
                error_code: "CONFIG_NOT_SAVED".to_string(),
                message: format!(
                    "Configuration version {} is in effect but could not be saved; \
                     it will be lost on restart",
                    report.version
                ),
                details: Some(e.to_string()),
            })?;
    }

    info!(
        version = report.version,
        changed = report.changes.len(),
        restart_pending = report.restart_pending,
        "Configuration edit applied"
    );

    Ok(Json(report))
}
