//! Application state shared across handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use meshfence_core::{ConfigResult, Configuration, Engine};
use tokio::sync::Mutex;
use tracing::info;

/// Handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
pub struct AppState {
    engine: Engine,
    config_path: PathBuf,
    started_at: Instant,
    save_lock: Mutex<()>,
}

impl AppState {
    /// Create new application state around a running engine.
    #[must_use]
    pub fn new(engine: Engine, config_path: PathBuf) -> SharedState {
        Arc::new(Self {
            engine,
            config_path,
            started_at: Instant::now(),
            save_lock: Mutex::new(()),
        })
    }

    /// The running engine.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Where accepted configuration edits are written.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Seconds since the server started.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Write the stored configuration, including restart-only values, to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub async fn persist_config(&self) -> ConfigResult<()> {
        let _guard = self.save_lock.lock().await;
        let stored: Configuration = self.engine.config().stored().await;
        stored.save(&self.config_path)?;
        info!(path = %self.config_path.display(), version = stored.version, "Configuration saved");
        Ok(())
    }
}
