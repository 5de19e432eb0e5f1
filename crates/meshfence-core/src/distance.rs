//! Reference distance tracking.
//!
//! Measures how far every other node is from the local node. The first distance
//! seen for a node becomes its baseline without an event; afterwards a change of
//! more than the configured threshold fires `distance_threshold` and moves the
//! baseline to the new distance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Configuration;
use crate::dispatch::EventSender;
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::types::{NodeId, NotificationEvent};

/// Output of one distance evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceTick {
    /// Distance from the local node to every other positioned node.
    pub distances: HashMap<NodeId, f64>,
    /// Threshold crossings.
    pub events: Vec<NotificationEvent>,
}

impl DistanceTick {
    /// Distance to the closest other node.
    #[must_use]
    pub fn closest_km(&self) -> Option<f64> {
        self.distances.values().copied().reduce(f64::min)
    }
}

/// Baselines owned by the distance timer task.
#[derive(Debug, Default)]
pub struct DistanceTracker {
    baselines: HashMap<NodeId, f64>,
}

impl DistanceTracker {
    /// Create a tracker with no baselines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline recorded for `node_id`.
    #[must_use]
    pub fn baseline(&self, node_id: &NodeId) -> Option<f64> {
        self.baselines.get(node_id).copied()
    }

    /// Measure distances and detect threshold crossings.
    ///
    /// Returns `None` without touching any baseline when the local node has no position.
    pub fn evaluate(
        &mut self,
        nodes: &RegistrySnapshot,
        config: &Configuration,
        now: DateTime<Utc>,
    ) -> Option<DistanceTick> {
        let local_id = NodeId::new(config.transport.local_node_id.clone());
        let local = nodes.get(&local_id)?.coordinates()?;
        let threshold = config.distance.notify_threshold_km;

        let mut tick = DistanceTick::default();
        for record in nodes.values().filter(|r| r.id != local_id) {
            let Some(position) = record.coordinates() else {
                continue;
            };
            let current = local.distance_km(&position, config.geodetic_radius_km);
            tick.distances.insert(record.id.clone(), current);

            match self.baselines.get(&record.id).copied() {
                None => {
                    self.baselines.insert(record.id.clone(), current);
                }
                Some(baseline) if (current - baseline).abs() > threshold => {
                    tick.events.push(NotificationEvent::distance_threshold(
                        record.id.clone(),
                        record.name.clone(),
                        current,
                        baseline,
                        now,
                    ));
                    self.baselines.insert(record.id.clone(), current);
                }
                Some(_) => {}
            }
        }

        // Forget nodes that left the registry so a return starts a fresh baseline.
        self.baselines.retain(|id, _| nodes.contains_key(id));
        Some(tick)
    }

    /// Run one distance tick: publish distances to the registry and submit crossings.
    ///
    /// Returns the closest-node distance, or `None` when nothing could be measured.
    pub async fn tick(
        &mut self,
        registry: &NodeRegistry,
        config: &Configuration,
        events: &EventSender,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let nodes = registry.snapshot().await;
        let Some(tick) = self.evaluate(&nodes, config, now) else {
            debug!("Local position unknown; skipping distance tick");
            return None;
        };

        registry.record_distances(&tick.distances).await;
        let closest = tick.closest_km();

        for event in tick.events {
            info!(
                node_id = %event.node_id,
                distance_km = event.payload.distance_km,
                previous_km = ?event.payload.previous_km,
                "Distance threshold crossed"
            );
            events.submit(event).await;
        }
        closest
    }
}
