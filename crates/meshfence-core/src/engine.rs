//! The running engine.
//!
//! [`Engine::start`] spawns one timer task per evaluator (geofence, distance,
//! stationary, stale cleanup) plus the notification dispatcher. Producers are
//! attached with [`Engine::spawn_producer`]. Every task watches one cancellation
//! token; [`Engine::shutdown`] cancels it and waits until the dispatcher has
//! drained its queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::config::Configuration;
use crate::config_manager::ConfigManager;
use crate::dispatch::{event_queue, DispatchRecord, Dispatcher, EventSender, MeshTransport, RecentDispatches};
use crate::distance::DistanceTracker;
use crate::geofence;
use crate::ingest::{run_producer, IngestOutcome, Ingestor, PositionSource, SourceBoard, SourceStatus};
use crate::registry::{NodeRecord, NodeRegistry};
use crate::stationary;
use crate::types::{NodeId, Position, PositionSample};

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock time derived from the tokio clock.
///
/// Follows `tokio::time::pause`/`advance`, so timer-driven behaviour can be tested
/// without waiting.
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    origin_utc: DateTime<Utc>,
    origin: Instant,
}

impl EngineClock {
    /// Start a clock at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin_utc: Utc::now(),
            origin: Instant::now(),
        }
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.origin_utc
            .checked_add_signed(elapsed)
            .unwrap_or(self.origin_utc)
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-period timer whose period follows the published configuration.
///
/// A reload that changes the period re-arms the timer immediately instead of
/// waiting out the tick already scheduled.
struct Ticker {
    interval: Interval,
    period: Duration,
    period_of: fn(&Configuration) -> Duration,
    updates: watch::Receiver<Arc<Configuration>>,
    following: bool,
}

impl Ticker {
    fn new(config: &ConfigManager, period_of: fn(&Configuration) -> Duration) -> Self {
        let mut updates = config.subscribe();
        let period = period_of(&updates.borrow_and_update());
        Self {
            interval: Self::arm(period),
            period,
            period_of,
            updates,
            following: true,
        }
    }

    fn arm(period: Duration) -> Interval {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn follow_update(&mut self) {
        let period = (self.period_of)(&self.updates.borrow_and_update());
        if period != self.period {
            debug!(from_secs = self.period.as_secs(), to_secs = period.as_secs(), "Re-arming timer");
            self.interval = Self::arm(period);
            self.period = period;
        }
    }

    /// Wait for the next tick. Returns `false` once `token` is cancelled.
    async fn wait(&mut self, token: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return false,
                changed = self.updates.changed(), if self.following => match changed {
                    Ok(()) => self.follow_update(),
                    Err(_) => self.following = false,
                },
                _ = self.interval.tick() => return true,
            }
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One node as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodeView {
    /// Node id.
    pub id: NodeId,

    /// Name used in notification text.
    #[schema(example = "Trail Runner")]
    pub display_name: String,

    /// Whether this is the local node.
    pub is_local: bool,

    /// Last known position.
    pub position: Option<Position>,

    /// Whether the last position is older than the freshness window.
    pub stale: bool,

    /// Geofences the node is inside.
    pub geofences: Vec<String>,

    /// When the node became stationary, if it is.
    pub stationary_since: Option<DateTime<Utc>>,

    /// Distance to the local node at the last distance tick.
    pub distance_km: Option<f64>,

    /// Number of positions held in history.
    pub history_len: usize,
}

impl NodeView {
    fn from_record(record: &NodeRecord, local_id: &NodeId, now: DateTime<Utc>, config: &Configuration) -> Self {
        Self {
            id: record.id.clone(),
            display_name: record
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| record.id.short_label()),
            is_local: &record.id == local_id,
            position: record.last_position,
            stale: !record.is_fresh(now, config.freshness_window()),
            geofences: record.geofences.iter().cloned().collect(),
            stationary_since: record.stationary_since,
            distance_km: record.reference_distance_km,
            history_len: record.history.len(),
        }
    }
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// Version of the configuration in effect.
    pub config_version: u64,

    /// Every tracked node, ordered by id.
    pub nodes: Vec<NodeView>,

    /// Node ids inside each configured geofence.
    pub geofence_occupancy: BTreeMap<String, Vec<NodeId>>,

    /// Nodes currently stationary.
    pub stationary_nodes: Vec<NodeId>,

    /// Distance from the local node to the closest other node.
    pub closest_node_km: Option<f64>,

    /// Position source health.
    pub sources: Vec<SourceStatus>,

    /// Recent notifications, newest first.
    pub recent_events: Vec<DispatchRecord>,
}

// ============================================================================
// Engine
// ============================================================================

/// Handle to the running engine.
pub struct Engine {
    config: Arc<ConfigManager>,
    registry: NodeRegistry,
    ingestor: Ingestor,
    sources: SourceBoard,
    recent: RecentDispatches,
    closest: watch::Sender<Option<f64>>,
    clock: EngineClock,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl Engine {
    /// Start the evaluator timers and the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: MeshTransport>(config: Arc<ConfigManager>, transport: T) -> Self {
        let registry = NodeRegistry::new();
        let token = CancellationToken::new();
        let tasks = TaskTracker::new();
        let recent = RecentDispatches::default();
        let (closest, _) = watch::channel(None);
        let (events, queue) = event_queue();
        let clock = EngineClock::new();

        let engine = Self {
            ingestor: Ingestor::new(registry.clone(), Arc::clone(&config), clock, token.clone()),
            config,
            registry,
            sources: SourceBoard::default(),
            recent,
            closest,
            clock,
            token,
            tasks,
        };

        let dispatcher = Dispatcher::new(
            transport,
            engine.registry.clone(),
            Arc::clone(&engine.config),
            engine.recent.clone(),
        );
        engine.tasks.spawn(dispatcher.run(queue, engine.token.clone()));

        engine.spawn_geofence_timer(events.clone());
        engine.spawn_distance_timer(events.clone());
        engine.spawn_stationary_timer(events);
        engine.spawn_cleanup_timer();

        let current = engine.config.current();
        info!(
            config_version = current.version,
            geofences = current.geofences.len(),
            local_node_id = %current.transport.local_node_id,
            "Engine started"
        );
        engine
    }

    fn spawn_geofence_timer(&self, events: EventSender) {
        let (config, registry, token, clock) = self.task_handles();
        self.tasks.spawn(async move {
            let mut ticker = Ticker::new(&config, Configuration::geofence_interval);
            while ticker.wait(&token).await {
                let snapshot = config.current();
                geofence::tick(&registry, &snapshot, &events, clock.now()).await;
            }
            debug!("Geofence timer stopped");
        });
    }

    fn spawn_distance_timer(&self, events: EventSender) {
        let (config, registry, token, clock) = self.task_handles();
        let closest = self.closest.clone();
        self.tasks.spawn(async move {
            let mut tracker = DistanceTracker::new();
            let mut ticker = Ticker::new(&config, Configuration::distance_interval);
            while ticker.wait(&token).await {
                let snapshot = config.current();
                let nearest = tracker.tick(&registry, &snapshot, &events, clock.now()).await;
                closest.send_replace(nearest);
            }
            debug!("Distance timer stopped");
        });
    }

    fn spawn_stationary_timer(&self, events: EventSender) {
        let (config, registry, token, clock) = self.task_handles();
        self.tasks.spawn(async move {
            let mut ticker = Ticker::new(&config, Configuration::stationary_interval);
            while ticker.wait(&token).await {
                let snapshot = config.current();
                stationary::tick(&registry, &snapshot, &events, clock.now()).await;
            }
            debug!("Stationary timer stopped");
        });
    }

    fn spawn_cleanup_timer(&self) {
        let (config, registry, token, clock) = self.task_handles();
        self.tasks.spawn(async move {
            let mut ticker = Ticker::new(&config, Configuration::cleanup_interval);
            while ticker.wait(&token).await {
                let snapshot = config.current();
                registry.remove_stale(clock.now(), snapshot.stale_timeout()).await;
            }
            debug!("Cleanup timer stopped");
        });
    }

    fn task_handles(&self) -> (Arc<ConfigManager>, NodeRegistry, CancellationToken, EngineClock) {
        (
            Arc::clone(&self.config),
            self.registry.clone(),
            self.token.clone(),
            self.clock,
        )
    }

    /// Attach a position source. Its producer runs until the source closes or the engine stops.
    pub fn spawn_producer<S: PositionSource>(&self, source: S) {
        self.tasks.spawn(run_producer(
            source,
            self.ingestor.clone(),
            self.sources.clone(),
            self.token.clone(),
        ));
    }

    /// Ingest one sample directly, bypassing any producer.
    pub async fn ingest(&self, sample: PositionSample) -> IngestOutcome {
        self.ingestor.ingest(sample).await
    }

    /// The engine's current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The configuration manager the engine reads from.
    #[must_use]
    pub const fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// The node registry.
    #[must_use]
    pub const fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Receiver of the closest-node distance, updated every distance tick.
    #[must_use]
    pub fn closest_node_km(&self) -> watch::Receiver<Option<f64>> {
        self.closest.subscribe()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Dashboard snapshot.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let config = self.config.current();
        let nodes = self.registry.snapshot().await;
        let now = self.clock.now();
        let local_id = NodeId::new(config.transport.local_node_id.clone());
        let closest_node_km = *self.closest.borrow();

        EngineSnapshot {
            taken_at: now,
            config_version: config.version,
            nodes: nodes
                .values()
                .map(|record| NodeView::from_record(record, &local_id, now, &config))
                .collect(),
            geofence_occupancy: geofence::occupancy(&nodes, &config),
            stationary_nodes: stationary::stationary_nodes(&nodes),
            closest_node_km,
            sources: self.sources.list().await,
            recent_events: self.recent.list().await,
        }
    }

    /// Stop every task and wait for the dispatcher to drain.
    ///
    /// Samples and events submitted afterwards are discarded.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Engine stopped");
    }
}
