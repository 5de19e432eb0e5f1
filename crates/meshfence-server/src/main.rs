//! # meshfence-server
//!
//! Gateway daemon for the meshfence geofence and proximity engine.
//!
//! This binary provides:
//! - The engine: periodic geofence, distance and stationary evaluation
//! - REST API for the dashboard, position ingestion and live configuration
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package meshfence-server
//!
//! # Production (on the gateway)
//! MESHFENCE_CONFIG=/etc/meshfence/config.toml ./meshfence-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use meshfence_core::{default_config_path, ConfigManager, Configuration, Engine};
use meshfence_server::api::create_router;
use meshfence_server::logging;
use meshfence_server::state::AppState;
use meshfence_server::transport::LogTransport;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting meshfence-server");

    let config_path = default_config_path();
    let config = Configuration::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let addr = format!("{}:{}", config.transport.http_host, config.transport.http_port);

    let manager = Arc::new(ConfigManager::new(config).context("invalid configuration")?);
    let engine = Engine::start(manager, LogTransport);
    let state = AppState::new(engine, config_path);

    let app = create_router(Arc::clone(&state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive()),
    );

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine().shutdown().await;
    info!("meshfence-server stopped");

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM from systemd.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
