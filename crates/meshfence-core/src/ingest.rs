//! Position ingest.
//!
//! Samples arrive from the local GPS receiver and from the mesh listener. Both are
//! validated, local fixes are re-keyed to the configured local node id, and the
//! result is written to the registry. Rejections are reported back to the caller as
//! an [`IngestOutcome`]; they never reach the registry.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config_manager::ConfigManager;
use crate::engine::EngineClock;
use crate::registry::{NodeRegistry, UpsertOutcome};
use crate::types::{NodeId, PositionSample, SampleSource};

/// Why a sample was not recorded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Coordinates that cannot be a real fix.
    #[error("Malformed sample for node '{node_id}': {reason}")]
    Malformed {
        /// Node the sample claimed to describe.
        node_id: NodeId,
        /// What was wrong with it.
        reason: String,
    },

    /// Older than the node's current position.
    #[error("Stale sample for node '{node_id}': {sample} predates {last}")]
    Stale {
        /// Node the sample described.
        node_id: NodeId,
        /// Timestamp of the rejected sample.
        sample: DateTime<Utc>,
        /// Timestamp of the position that was kept.
        last: DateTime<Utc>,
    },

    /// The engine is shutting down.
    #[error("Engine stopped")]
    EngineStopped,
}

/// Failure reported by a position source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_kind} position source failed: {reason}")]
pub struct SourceError {
    /// Which kind of source failed.
    pub source_kind: SampleSource,
    /// Human-readable reason.
    pub reason: String,
}

impl SourceError {
    /// Build an error for `source_kind`.
    pub fn new(source_kind: SampleSource, reason: impl Into<String>) -> Self {
        Self {
            source_kind,
            reason: reason.into(),
        }
    }
}

/// Result of ingesting one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The sample was recorded.
    Accepted {
        /// Registry key the sample was stored under.
        node_id: NodeId,
        /// Whether this sample created the node.
        created: bool,
    },
    /// The sample was discarded.
    Rejected(IngestError),
}

impl IngestOutcome {
    /// Whether the sample was recorded.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Convert into a `Result`, for callers that want `?`.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason.
    pub fn into_result(self) -> Result<NodeId, IngestError> {
        match self {
            Self::Accepted { node_id, .. } => Ok(node_id),
            Self::Rejected(err) => Err(err),
        }
    }
}

/// A producer of position samples, such as a serial GPS reader or a mesh listener.
///
/// `Ok(None)` means the source is exhausted and its producer task should end.
pub trait PositionSource: Send + 'static {
    /// Name shown in the source status list.
    fn name(&self) -> &str;

    /// Which kind of producer this is.
    fn kind(&self) -> SampleSource;

    /// Wait for the next sample.
    fn next_sample(
        &mut self,
    ) -> impl Future<Output = Result<Option<PositionSample>, SourceError>> + Send;
}

/// Check that a sample describes a plausible fix.
///
/// # Errors
///
/// Returns [`IngestError::Malformed`] for non-finite or out-of-range coordinates and
/// for the `(0, 0)` placeholder receivers report before they have a fix.
pub fn validate_sample(sample: &PositionSample) -> Result<(), IngestError> {
    let coordinates = sample.coordinates();
    let reason = if !sample.latitude.is_finite() || !sample.longitude.is_finite() {
        Some("coordinates are not finite".to_string())
    } else if !coordinates.in_range() {
        Some(format!(
            "coordinates ({}, {}) out of range",
            sample.latitude, sample.longitude
        ))
    } else if coordinates.is_null_island() {
        Some("no GPS fix (0, 0)".to_string())
    } else if sample.node_id.as_str().trim().is_empty() {
        Some("empty node id".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(IngestError::Malformed {
            node_id: sample.node_id.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Reject a sample dated more than `max_skew` ahead of `now`.
///
/// Such a sample would otherwise pin the node: every later real fix would look
/// out of order and the node would never age out.
///
/// # Errors
///
/// Returns [`IngestError::Malformed`] for a sample from the future.
pub fn check_timestamp(
    sample: &PositionSample,
    now: DateTime<Utc>,
    max_skew: chrono::Duration,
) -> Result<(), IngestError> {
    match now.checked_add_signed(max_skew) {
        Some(limit) if sample.timestamp > limit => Err(IngestError::Malformed {
            node_id: sample.node_id.clone(),
            reason: format!(
                "timestamp {} is more than {}s ahead of the local clock",
                sample.timestamp,
                max_skew.num_seconds()
            ),
        }),
        _ => Ok(()),
    }
}

/// Writes validated samples into the registry.
#[derive(Clone)]
pub struct Ingestor {
    registry: NodeRegistry,
    config: Arc<ConfigManager>,
    clock: EngineClock,
    stopped: CancellationToken,
}

impl Ingestor {
    /// Create an ingestor that stops accepting samples once `stopped` is cancelled.
    #[must_use]
    pub fn new(
        registry: NodeRegistry,
        config: Arc<ConfigManager>,
        clock: EngineClock,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            clock,
            stopped,
        }
    }

    /// Validate, normalise and record one sample.
    pub async fn ingest(&self, sample: PositionSample) -> IngestOutcome {
        if self.stopped.is_cancelled() {
            return IngestOutcome::Rejected(IngestError::EngineStopped);
        }

        let config = self.config.current();
        let checked = validate_sample(&sample)
            .and_then(|()| check_timestamp(&sample, self.clock.now(), config.max_clock_skew()));
        if let Err(err) = checked {
            warn!(
                source = %sample.source,
                node_id = %sample.node_id,
                error = %err,
                "Discarding malformed position sample"
            );
            return IngestOutcome::Rejected(err);
        }

        let node_id = match sample.source {
            SampleSource::Local => NodeId::new(config.transport.local_node_id.clone()),
            SampleSource::Mesh => sample.node_id.clone(),
        };

        let outcome = self
            .registry
            .upsert_position(
                &node_id,
                sample.name.as_deref(),
                sample.position(),
                config.stationary_window(),
            )
            .await;

        match outcome {
            UpsertOutcome::Created => IngestOutcome::Accepted {
                node_id,
                created: true,
            },
            UpsertOutcome::Updated => IngestOutcome::Accepted {
                node_id,
                created: false,
            },
            UpsertOutcome::Stale { last } => {
                debug!(
                    node_id = %node_id,
                    sample = %sample.timestamp,
                    last = %last,
                    "Ignoring out-of-order position sample"
                );
                IngestOutcome::Rejected(IngestError::Stale {
                    node_id,
                    sample: sample.timestamp,
                    last,
                })
            }
        }
    }
}

// ============================================================================
// Source status
// ============================================================================

/// Health of one position source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SourceStatus {
    /// Source name.
    #[schema(example = "gps")]
    pub name: String,

    /// Source kind.
    pub kind: SampleSource,

    /// Whether the last interaction with the source succeeded.
    pub connected: bool,

    /// Whether the source has ended.
    pub closed: bool,

    /// Time of the last accepted sample.
    pub last_sample_at: Option<DateTime<Utc>>,

    /// Samples recorded.
    pub accepted: u64,

    /// Samples discarded.
    pub rejected: u64,

    /// Most recent source error.
    pub last_error: Option<String>,
}

/// Shared status table of every running producer.
#[derive(Debug, Clone, Default)]
pub struct SourceBoard {
    sources: Arc<RwLock<BTreeMap<String, SourceStatus>>>,
}

impl SourceBoard {
    /// Current status of every source, ordered by name.
    pub async fn list(&self) -> Vec<SourceStatus> {
        self.sources.read().await.values().cloned().collect()
    }

    async fn register(&self, name: &str, kind: SampleSource) {
        self.sources.write().await.insert(
            name.to_string(),
            SourceStatus {
                name: name.to_string(),
                kind,
                connected: true,
                closed: false,
                last_sample_at: None,
                accepted: 0,
                rejected: 0,
                last_error: None,
            },
        );
    }

    async fn update(&self, name: &str, f: impl FnOnce(&mut SourceStatus)) {
        if let Some(status) = self.sources.write().await.get_mut(name) {
            f(status);
        }
    }

    async fn record(&self, name: &str, outcome: &IngestOutcome, now: DateTime<Utc>) {
        self.update(name, |status| {
            status.connected = true;
            if outcome.is_accepted() {
                status.accepted += 1;
                status.last_sample_at = Some(now);
            } else {
                status.rejected += 1;
            }
        })
        .await;
    }
}

/// Pull samples from `source` until it closes or `token` is cancelled.
///
/// A source error marks the source disconnected and pauses for the configured
/// reconnect delay before asking again.
pub(crate) async fn run_producer<S: PositionSource>(
    mut source: S,
    ingestor: Ingestor,
    board: SourceBoard,
    token: CancellationToken,
) {
    let name = source.name().to_string();
    board.register(&name, source.kind()).await;
    info!(source = %name, kind = %source.kind(), "Position source started");

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = source.next_sample() => next,
        };

        match next {
            Ok(Some(sample)) => {
                let outcome = ingestor.ingest(sample).await;
                board.record(&name, &outcome, Utc::now()).await;
            }
            Ok(None) => {
                info!(source = %name, "Position source closed");
                board
                    .update(&name, |status| {
                        status.closed = true;
                        status.connected = false;
                    })
                    .await;
                return;
            }
            Err(err) => {
                let delay = ingestor.config.current().reconnect_delay();
                warn!(
                    source = %name,
                    error = %err,
                    retry_in_secs = delay.as_secs(),
                    "Position source disconnected"
                );
                board
                    .update(&name, |status| {
                        status.connected = false;
                        status.last_error = Some(err.reason.clone());
                    })
                    .await;

                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!(source = %name, "Position source stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    fn sample(source: SampleSource, id: &str, lat: f64, lon: f64, secs: i64) -> PositionSample {
        PositionSample {
            source,
            node_id: NodeId::new(id),
            name: None,
            latitude: lat,
            longitude: lon,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn ingestor() -> (Ingestor, NodeRegistry, CancellationToken) {
        let mut config = Configuration::default();
        config.transport.local_node_id = "!local".to_string();
        let manager = Arc::new(ConfigManager::new(config).unwrap());
        let registry = NodeRegistry::new();
        let token = CancellationToken::new();
        (
            Ingestor::new(registry.clone(), manager, EngineClock::new(), token.clone()),
            registry,
            token,
        )
    }

    #[test]
    fn test_validate_rejects_bad_coordinates() {
        assert!(validate_sample(&sample(SampleSource::Mesh, "!1", 91.0, 0.0, 0)).is_err());
        assert!(validate_sample(&sample(SampleSource::Mesh, "!1", 0.0, -180.5, 0)).is_err());
        assert!(validate_sample(&sample(SampleSource::Mesh, "!1", f64::NAN, 1.0, 0)).is_err());
        assert!(validate_sample(&sample(SampleSource::Mesh, "!1", 0.0, 0.0, 0)).is_err());
        assert!(validate_sample(&sample(SampleSource::Mesh, " ", 1.0, 1.0, 0)).is_err());
        assert!(validate_sample(&sample(SampleSource::Mesh, "!1", 0.0, 0.04, 0)).is_ok());
    }

    #[tokio::test]
    async fn test_local_samples_are_rekeyed() {
        let (ingestor, registry, _token) = ingestor();
        let outcome = ingestor
            .ingest(sample(SampleSource::Local, "gps0", 10.0, 10.0, 0))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Accepted {
                node_id: NodeId::new("!local"),
                created: true
            }
        );
        assert!(registry.get(&NodeId::new("!local")).await.is_some());
        assert!(registry.get(&NodeId::new("gps0")).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_sample_is_rejected() {
        let (ingestor, _registry, _token) = ingestor();
        tokio_test::assert_ok!(
            ingestor
                .ingest(sample(SampleSource::Mesh, "!1", 10.0, 10.0, 100))
                .await
                .into_result()
        );

        let outcome = ingestor
            .ingest(sample(SampleSource::Mesh, "!1", 11.0, 11.0, 50))
            .await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(IngestError::Stale { .. })
        ));
    }

    #[tokio::test]
    async fn test_future_sample_is_rejected_and_does_not_pin_node() {
        let (ingestor, registry, _token) = ingestor();
        let now = Utc::now();
        let far_future = PositionSample {
            timestamp: now + chrono::Duration::days(365 * 50),
            ..sample(SampleSource::Mesh, "!1", 10.0, 10.0, 0)
        };

        let outcome = ingestor.ingest(far_future).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(IngestError::Malformed { .. })
        ));
        assert!(registry.is_empty().await);

        let real = PositionSample {
            timestamp: now + chrono::Duration::seconds(60),
            ..sample(SampleSource::Mesh, "!1", 10.0, 10.0, 0)
        };
        assert!(ingestor.ingest(real).await.is_accepted());
    }

    #[test]
    fn test_check_timestamp_allows_small_skew() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let skew = chrono::Duration::seconds(300);
        let ahead = |secs| PositionSample {
            timestamp: now + chrono::Duration::seconds(secs),
            ..sample(SampleSource::Mesh, "!1", 10.0, 10.0, 0)
        };

        assert!(check_timestamp(&ahead(-3600), now, skew).is_ok());
        assert!(check_timestamp(&ahead(300), now, skew).is_ok());
        assert!(check_timestamp(&ahead(301), now, skew).is_err());
        assert!(check_timestamp(&ahead(0), now, chrono::Duration::MAX).is_ok());
    }

    #[tokio::test]
    async fn test_stopped_ingestor_rejects() {
        let (ingestor, registry, token) = ingestor();
        token.cancel();

        let outcome = ingestor
            .ingest(sample(SampleSource::Mesh, "!1", 10.0, 10.0, 0))
            .await;
        assert_eq!(outcome, IngestOutcome::Rejected(IngestError::EngineStopped));
        assert!(registry.is_empty().await);
    }

    struct ScriptedSource {
        steps: VecDeque<Result<Option<PositionSample>, SourceError>>,
    }

    impl PositionSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> SampleSource {
            SampleSource::Mesh
        }

        async fn next_sample(&mut self) -> Result<Option<PositionSample>, SourceError> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_survives_source_errors() {
        let (ingestor, registry, token) = ingestor();
        let board = SourceBoard::default();
        let source = ScriptedSource {
            steps: VecDeque::from([
                Ok(Some(sample(SampleSource::Mesh, "!1", 10.0, 10.0, 0))),
                Err(SourceError::new(SampleSource::Mesh, "serial port vanished")),
                Ok(Some(sample(SampleSource::Mesh, "!2", 10.0, 10.0, 1))),
                Ok(Some(sample(SampleSource::Mesh, "!2", 0.0, 0.0, 2))),
                Ok(None),
            ]),
        };

        run_producer(source, ingestor, board.clone(), token).await;

        assert_eq!(registry.len().await, 2);
        let status = board.list().await.remove(0);
        assert_eq!(status.name, "scripted");
        assert_eq!(status.accepted, 2);
        assert_eq!(status.rejected, 1);
        assert!(status.closed);
        assert_eq!(status.last_error.as_deref(), Some("serial port vanished"));
    }
}
