//! Authoritative store of per-node tracking state.
//!
//! The registry is the only place node state lives. Producers write positions,
//! evaluators read point-in-time snapshots and write back their results through
//! the narrow methods below. Every method takes the table lock exactly once, so a
//! reader never sees a record mid-mutation and a tick's membership result lands
//! all at once.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::geo::Coordinates;
use crate::types::{NodeId, NotifyKey, Position};

/// Hard cap on history entries per node, whatever the time window.
pub const MAX_HISTORY_LEN: usize = 256;

/// Tracking state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Stable node id.
    pub id: NodeId,

    /// Display name advertised by the node.
    pub name: Option<String>,

    /// Most recent accepted position.
    pub last_position: Option<Position>,

    /// Recent positions, oldest first.
    pub history: VecDeque<Position>,

    /// Geofences the node was inside at the last geofence tick.
    pub geofences: BTreeSet<String>,

    /// When the node was last declared stationary, if it still is.
    pub stationary_since: Option<DateTime<Utc>>,

    /// Last dispatch time per notification identity.
    pub last_notified: HashMap<NotifyKey, DateTime<Utc>>,

    /// Distance to the local node at the last distance tick.
    pub reference_distance_km: Option<f64>,
}

impl NodeRecord {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            name: None,
            last_position: None,
            history: VecDeque::new(),
            geofences: BTreeSet::new(),
            stationary_since: None,
            last_notified: HashMap::new(),
            reference_distance_km: None,
        }
    }

    /// Current coordinates, if the node has reported a position.
    #[must_use]
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.last_position.map(|p| p.coordinates)
    }

    /// Whether the last position is younger than `freshness`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        self.last_position
            .is_some_and(|p| now.signed_duration_since(p.timestamp) <= freshness)
    }

    /// Positions covering the trailing `window`, anchor first.
    ///
    /// The anchor is the newest sample at least `window` older than the latest one.
    /// Returns `None` until the history holds two samples and spans the window.
    #[must_use]
    pub fn trailing_window(&self, window: Duration) -> Option<(Vec<Coordinates>, Duration)> {
        if self.history.len() < 2 {
            return None;
        }
        let newest = self.history.back()?.timestamp;
        let anchor = self
            .history
            .iter()
            .rposition(|p| newest.signed_duration_since(p.timestamp) >= window)?;

        let span = newest.signed_duration_since(self.history[anchor].timestamp);
        let points = self
            .history
            .range(anchor..)
            .map(|p| p.coordinates)
            .collect::<Vec<_>>();
        if points.len() < 2 {
            return None;
        }
        Some((points, span))
    }

    fn push_history(&mut self, position: Position, window: Duration) {
        match self.history.back_mut() {
            Some(last) if last.timestamp == position.timestamp => *last = position,
            _ => self.history.push_back(position),
        }

        // Keep one anchor at or behind the window start, drop everything older.
        let newest = position.timestamp;
        if let Some(anchor) = self
            .history
            .iter()
            .rposition(|p| newest.signed_duration_since(p.timestamp) >= window)
        {
            self.history.drain(..anchor);
        }
        // Over the cap, halve the interior density; the anchor and newest sample stay.
        if self.history.len() > MAX_HISTORY_LEN {
            let last = self.history.len() - 1;
            let mut index = 0;
            self.history.retain(|_| {
                let keep = index == 0 || index == last || index % 2 == 0;
                index += 1;
                keep
            });
        }
    }
}

/// Result of [`NodeRegistry::upsert_position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created.
    Created,
    /// An existing record was updated.
    Updated,
    /// The sample predates the node's last position and was discarded.
    Stale {
        /// Timestamp of the position that was kept.
        last: DateTime<Utc>,
    },
}

/// One node's membership as computed by a geofence tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipUpdate {
    /// Node the result belongs to.
    pub node_id: NodeId,
    /// Geofences the node is inside.
    pub geofences: BTreeSet<String>,
}

/// A point-in-time copy of every node record, ordered by id.
pub type RegistrySnapshot = BTreeMap<NodeId, NodeRecord>;

/// Shared handle to the node table.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<BTreeMap<NodeId, NodeRecord>>>,
}

impl NodeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position for `node_id`, creating the node if needed.
    ///
    /// A sample older than the node's current position is rejected so reordered
    /// mesh packets cannot move a node backwards in time.
    pub async fn upsert_position(
        &self,
        node_id: &NodeId,
        name: Option<&str>,
        position: Position,
        history_window: Duration,
    ) -> UpsertOutcome {
        let mut nodes = self.nodes.write().await;

        let created = !nodes.contains_key(node_id);
        let record = nodes
            .entry(node_id.clone())
            .or_insert_with(|| NodeRecord::new(node_id.clone()));

        if let Some(last) = record.last_position {
            if position.timestamp < last.timestamp {
                return UpsertOutcome::Stale {
                    last: last.timestamp,
                };
            }
        }

        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            if record.name.as_deref() != Some(name) {
                record.name = Some(name.to_string());
            }
        }
        record.last_position = Some(position);
        record.push_history(position, history_window);

        if created {
            info!(node_id = %node_id, "Discovered new node");
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        }
    }

    /// Point-in-time copy of all records.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.nodes.read().await.clone()
    }

    /// Copy of a single record.
    pub async fn get(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// Number of tracked nodes.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Whether no node is tracked.
    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Remove nodes whose last position is older than `timeout`. Returns the removed ids.
    pub async fn remove_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<NodeId> {
        let mut nodes = self.nodes.write().await;
        let stale: Vec<NodeId> = nodes
            .values()
            .filter(|record| {
                record
                    .last_position
                    .map_or(true, |p| now.signed_duration_since(p.timestamp) > timeout)
            })
            .map(|record| record.id.clone())
            .collect();

        for id in &stale {
            nodes.remove(id);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), nodes = ?stale, "Removed stale nodes");
        }
        stale
    }

    /// Replace the membership sets of every node evaluated in one geofence tick.
    ///
    /// Nodes removed since the snapshot was taken are skipped.
    pub async fn commit_membership(&self, updates: Vec<MembershipUpdate>) {
        let mut nodes = self.nodes.write().await;
        for update in updates {
            if let Some(record) = nodes.get_mut(&update.node_id) {
                record.geofences = update.geofences;
            }
        }
    }

    /// Set or clear a node's stationary mark. Returns `false` if the node is gone.
    pub async fn set_stationary(&self, node_id: &NodeId, since: Option<DateTime<Utc>>) -> bool {
        let mut nodes = self.nodes.write().await;
        nodes.get_mut(node_id).map_or(false, |record| {
            record.stationary_since = since;
            true
        })
    }

    /// Publish the reference distances of one distance tick.
    ///
    /// Nodes missing from `distances` have their distance cleared.
    pub async fn record_distances(&self, distances: &HashMap<NodeId, f64>) {
        let mut nodes = self.nodes.write().await;
        for (id, record) in nodes.iter_mut() {
            record.reference_distance_km = distances.get(id).copied();
        }
    }

    /// Atomically check the cool-down for `key` and, if it has elapsed, stamp `now`.
    ///
    /// Returns `true` when the notification may be sent. Unknown nodes are always allowed.
    pub async fn try_mark_notified(
        &self,
        node_id: &NodeId,
        key: NotifyKey,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        let mut nodes = self.nodes.write().await;
        let Some(record) = nodes.get_mut(node_id) else {
            return true;
        };

        if let Some(last) = record.last_notified.get(&key) {
            if now.signed_duration_since(*last) < cooldown {
                debug!(node_id = %node_id, kind = %key.kind, "Notification within cool-down");
                return false;
            }
        }
        record.last_notified.insert(key, now);
        true
    }
}
