//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `status` - Dashboard snapshot of the engine
//! - `positions` - Position sample ingestion
//! - `config` - Live configuration management
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub mod config;
pub mod error;
pub mod health;
pub mod openapi;
pub mod positions;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};

// Used by the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /status            - Engine snapshot for the dashboard
/// ├── /positions         - Submit a position sample
/// ├── /config            - Read and edit configuration
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/status", get(status::get_status))
                .route("/positions", post(positions::ingest_position))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/config", config::router()),
        )
        .with_state(state)
}
