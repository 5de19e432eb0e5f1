//! Atomic, validated, hot-swappable configuration.
//!
//! Readers take an `Arc<Configuration>` out of a `watch` channel and keep it for the
//! whole evaluation tick, so a reload can never be observed half-applied. Writers go
//! through [`ConfigManager::propose`], which validates the candidate and publishes it
//! as a new version in one step.
//!
//! Restart-only fields are stored (and reported as pending) but the published
//! snapshot keeps the transport settings the process booted with.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::info;
use utoipa::ToSchema;

use crate::config::{ConfigPatch, ConfigResult, Configuration, ReloadMode, TransportSettings};

/// How one changed field was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldChange {
    /// Dotted field path.
    #[schema(example = "stationary.epsilon_km")]
    pub field: String,

    /// Whether the change is already live or waits for a restart.
    pub mode: ReloadMode,
}

/// Outcome of an accepted configuration proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": 4,
    "changes": [
        { "field": "geofences", "mode": "live" },
        { "field": "transport.http_port", "mode": "restart" }
    ],
    "restart_pending": true
}))]
pub struct ProposalReport {
    /// Version of the published snapshot.
    pub version: u64,

    /// Fields that differ from the previously stored configuration.
    pub changes: Vec<FieldChange>,

    /// Whether stored restart-only settings differ from the running ones.
    pub restart_pending: bool,
}

impl ProposalReport {
    /// Fields applied without a restart.
    pub fn applied_live(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.mode == ReloadMode::Live)
            .map(|c| c.field.as_str())
    }

    /// Fields waiting for a restart.
    pub fn requires_restart(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.mode == ReloadMode::Restart)
            .map(|c| c.field.as_str())
    }
}

/// Owner of the live configuration.
pub struct ConfigManager {
    published: watch::Sender<Arc<Configuration>>,
    stored: Mutex<Configuration>,
    boot_transport: TransportSettings,
}

impl ConfigManager {
    /// Create a manager from the configuration the process booted with.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of `initial`.
    pub fn new(initial: Configuration) -> ConfigResult<Self> {
        initial.validate()?;

        let boot_transport = initial.transport.clone();
        let published = Configuration {
            version: 1,
            ..initial.clone()
        };
        let (tx, _rx) = watch::channel(Arc::new(published));

        Ok(Self {
            published: tx,
            stored: Mutex::new(Configuration {
                version: 1,
                ..initial
            }),
            boot_transport,
        })
    }

    /// The effective configuration snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<Configuration> {
        self.published.borrow().clone()
    }

    /// Receiver notified on every published version.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Configuration>> {
        self.published.subscribe()
    }

    /// The stored configuration, including restart-only values not yet in effect.
    pub async fn stored(&self) -> Configuration {
        self.stored.lock().await.clone()
    }

    /// Whether stored restart-only settings differ from the running ones.
    pub async fn restart_pending(&self) -> bool {
        self.stored.lock().await.transport != self.boot_transport
    }

    /// Validate and publish a full configuration.
    ///
    /// # Errors
    ///
    /// Returns every validation error; the previous configuration stays in effect.
    pub async fn propose(&self, candidate: Configuration) -> ConfigResult<ProposalReport> {
        let mut stored = self.stored.lock().await;
        self.publish(&mut stored, candidate)
    }

    /// Merge a partial document over the stored configuration and publish the result.
    ///
    /// # Errors
    ///
    /// Returns every validation error of the merged configuration.
    pub async fn apply_patch(&self, patch: ConfigPatch) -> ConfigResult<ProposalReport> {
        let mut stored = self.stored.lock().await;
        let candidate = patch.apply_to(&stored);
        self.publish(&mut stored, candidate)
    }

    fn publish(
        &self,
        stored: &mut Configuration,
        candidate: Configuration,
    ) -> ConfigResult<ProposalReport> {
        candidate.validate()?;

        let changes: Vec<FieldChange> = candidate
            .changed_fields(stored)
            .into_iter()
            .map(|field| FieldChange {
                field: field.path().to_string(),
                mode: field.reload_mode(),
            })
            .collect();

        if changes.is_empty() {
            return Ok(ProposalReport {
                version: stored.version,
                changes,
                restart_pending: stored.transport != self.boot_transport,
            });
        }

        let version = stored.version + 1;
        *stored = Configuration {
            version,
            ..candidate
        };

        let effective = stored.with_transport(&self.boot_transport);
        self.published.send_replace(Arc::new(effective));

        let report = ProposalReport {
            version,
            changes,
            restart_pending: stored.transport != self.boot_transport,
        };
        info!(
            version,
            live = ?report.applied_live().collect::<Vec<_>>(),
            restart = ?report.requires_restart().collect::<Vec<_>>(),
            "Configuration updated"
        );
        Ok(report)
    }
}
