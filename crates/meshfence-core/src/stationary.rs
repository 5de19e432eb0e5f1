//! Stationary detection over each node's recent position history.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Configuration;
use crate::dispatch::EventSender;
use crate::geo::max_pairwise_km;
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::types::{EventKind, NodeId, NotificationEvent};

/// Output of one stationary evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationaryTick {
    /// Motion state changes.
    pub events: Vec<NotificationEvent>,
    /// Stationary marks to write back: `Some(since)` to set, `None` to clear.
    pub marks: Vec<(NodeId, Option<DateTime<Utc>>)>,
}

/// Look for nodes that stopped moving or started again.
///
/// Only nodes whose history spans the configured duration are considered. Within
/// that window, a node whose samples all lie within epsilon of each other is
/// stationary; a stationary node whose samples spread to epsilon or more is moving.
#[must_use]
pub fn evaluate(nodes: &RegistrySnapshot, config: &Configuration, now: DateTime<Utc>) -> StationaryTick {
    let window = config.stationary_window();
    let epsilon = config.stationary.epsilon_km;
    let mut tick = StationaryTick::default();

    for record in nodes.values() {
        let Some((points, span)) = record.trailing_window(window) else {
            continue;
        };
        let moved = max_pairwise_km(&points, config.geodetic_radius_km);

        let kind = match record.stationary_since {
            None if moved < epsilon => EventKind::Stationary,
            Some(_) if moved >= epsilon => EventKind::MovingAgain,
            _ => continue,
        };

        let since = (kind == EventKind::Stationary).then_some(now);
        tick.marks.push((record.id.clone(), since));
        tick.events.push(NotificationEvent::motion(
            kind,
            record.id.clone(),
            record.name.clone(),
            moved,
            span.num_seconds(),
            now,
        ));
    }

    tick
}

/// Run one stationary tick against the registry.
///
/// Returns the number of events submitted.
pub async fn tick(
    registry: &NodeRegistry,
    config: &Configuration,
    events: &EventSender,
    now: DateTime<Utc>,
) -> usize {
    let nodes = registry.snapshot().await;
    let StationaryTick {
        events: found,
        marks,
    } = evaluate(&nodes, config, now);

    for (node_id, since) in marks {
        registry.set_stationary(&node_id, since).await;
    }

    let count = found.len();
    for event in found {
        info!(
            node_id = %event.node_id,
            kind = %event.kind,
            moved_km = event.payload.distance_km,
            "Motion state changed"
        );
        events.submit(event).await;
    }
    count
}

/// Ids of nodes currently marked stationary.
#[must_use]
pub fn stationary_nodes(nodes: &RegistrySnapshot) -> Vec<NodeId> {
    nodes
        .values()
        .filter(|record| record.stationary_since.is_some())
        .map(|record| record.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinates;
    use crate::types::Position;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn config() -> Configuration {
        let mut config = Configuration::default();
        config.stationary.epsilon_km = 0.01;
        config.stationary.duration_secs = 300;
        config
    }

    async fn place(registry: &NodeRegistry, config: &Configuration, lat: f64, lon: f64, secs: i64) {
        registry
            .upsert_position(
                &NodeId::new("!1"),
                Some("Hiker"),
                Position {
                    coordinates: Coordinates::new(lat, lon),
                    timestamp: t(secs),
                },
                config.stationary_window(),
            )
            .await;
    }

    async fn run(registry: &NodeRegistry, config: &Configuration, now: DateTime<Utc>) -> Vec<NotificationEvent> {
        let tick = evaluate(&registry.snapshot().await, config, now);
        for (id, since) in tick.marks {
            registry.set_stationary(&id, since).await;
        }
        tick.events
    }

    #[tokio::test]
    async fn test_short_history_is_never_evaluated() {
        let registry = NodeRegistry::new();
        let config = config();
        for secs in [0, 60, 120, 240] {
            place(&registry, &config, 10.0, 10.0, secs).await;
            assert!(run(&registry, &config, t(secs)).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_stationary_then_moving_again() {
        let registry = NodeRegistry::new();
        let config = config();

        let mut events = Vec::new();
        for secs in (0..=300).step_by(60) {
            place(&registry, &config, 10.0, 10.0, secs).await;
            events.extend(run(&registry, &config, t(secs)).await);
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Stationary);
        assert_eq!(events[0].payload.window_secs, Some(300));
        assert_eq!(stationary_nodes(&registry.snapshot().await), vec![NodeId::new("!1")]);

        // Still parked: no repeat.
        place(&registry, &config, 10.0, 10.0, 330).await;
        assert!(run(&registry, &config, t(330)).await.is_empty());

        place(&registry, &config, 10.0, 10.01, 360).await;
        let moved = run(&registry, &config, t(360)).await;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].kind, EventKind::MovingAgain);
        assert!((moved[0].payload.distance_km - 1.095).abs() < 0.01);
        assert!(stationary_nodes(&registry.snapshot().await).is_empty());

        // Spread stays above epsilon: nothing further.
        place(&registry, &config, 10.0, 10.02, 420).await;
        assert!(run(&registry, &config, t(420)).await.is_empty());
    }

    #[tokio::test]
    async fn test_wandering_node_is_not_stationary() {
        let registry = NodeRegistry::new();
        let config = config();
        for (i, secs) in (0..=300).step_by(60).enumerate() {
            let lon = 10.0 + f64::from(u32::try_from(i).unwrap()) * 0.001;
            place(&registry, &config, 10.0, lon, secs).await;
        }
        assert!(run(&registry, &config, t(300)).await.is_empty());
        assert!(registry
            .get(&NodeId::new("!1"))
            .await
            .unwrap()
            .stationary_since
            .is_none());
    }

    #[tokio::test]
    async fn test_node_reporting_every_second_becomes_stationary() {
        let registry = NodeRegistry::new();
        let config = config();

        let mut events = Vec::new();
        for secs in 0..=600 {
            place(&registry, &config, 10.0, 10.0, secs).await;
            if secs % 10 == 0 {
                events.extend(run(&registry, &config, t(secs)).await);
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Stationary);
        assert!(events[0].payload.window_secs >= Some(300));
    }
}
