//! Geofence membership evaluation.
//!
//! Each tick compares every positioned node against every geofence of the tick's
//! configuration snapshot and reports enter/exit transitions. The full membership
//! result is committed to the registry in one write.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Configuration;
use crate::dispatch::EventSender;
use crate::registry::{MembershipUpdate, NodeRegistry, RegistrySnapshot};
use crate::types::{NodeId, NotificationEvent};

/// Output of one geofence evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeofenceTick {
    /// Transitions found, in node then geofence order.
    pub events: Vec<NotificationEvent>,
    /// New membership of every evaluated node.
    pub updates: Vec<MembershipUpdate>,
}

/// Compare current positions against the configured geofences.
///
/// A node is inside when its distance to the center is at most the radius. Nodes
/// without a position keep their membership. Memberships naming geofences that
/// are no longer configured are dropped without an exit.
#[must_use]
pub fn evaluate(nodes: &RegistrySnapshot, config: &Configuration, now: DateTime<Utc>) -> GeofenceTick {
    let configured: BTreeSet<&str> = config.geofences.iter().map(|g| g.name.as_str()).collect();
    let mut tick = GeofenceTick::default();

    for record in nodes.values() {
        let Some(position) = record.coordinates() else {
            let kept: BTreeSet<String> = record
                .geofences
                .iter()
                .filter(|name| configured.contains(name.as_str()))
                .cloned()
                .collect();
            if kept != record.geofences {
                tick.updates.push(MembershipUpdate {
                    node_id: record.id.clone(),
                    geofences: kept,
                });
            }
            continue;
        };

        let mut inside = BTreeSet::new();
        for fence in &config.geofences {
            let distance = position.distance_km(&fence.center(), config.geodetic_radius_km);
            let is_inside = distance <= fence.radius_km;
            let was_inside = record.geofences.contains(&fence.name);

            if is_inside {
                inside.insert(fence.name.clone());
            }

            match (was_inside, is_inside) {
                (false, true) => tick.events.push(NotificationEvent::enter(
                    record.id.clone(),
                    record.name.clone(),
                    &fence.name,
                    distance,
                    fence.radius_km,
                    now,
                )),
                (true, false) => tick.events.push(NotificationEvent::exit(
                    record.id.clone(),
                    record.name.clone(),
                    &fence.name,
                    distance,
                    fence.radius_km,
                    now,
                )),
                _ => {}
            }
        }

        tick.updates.push(MembershipUpdate {
            node_id: record.id.clone(),
            geofences: inside,
        });
    }

    tick
}

/// Run one geofence tick against the registry and hand transitions to the dispatcher.
///
/// Returns the number of events submitted.
pub async fn tick(
    registry: &NodeRegistry,
    config: &Configuration,
    events: &EventSender,
    now: DateTime<Utc>,
) -> usize {
    let nodes = registry.snapshot().await;
    let GeofenceTick {
        events: found,
        updates,
    } = evaluate(&nodes, config, now);

    registry.commit_membership(updates).await;

    let count = found.len();
    for event in found {
        info!(
            node_id = %event.node_id,
            geofence = event.geofence.as_deref().unwrap_or_default(),
            kind = %event.kind,
            distance_km = event.payload.distance_km,
            "Geofence transition"
        );
        events.submit(event).await;
    }
    debug!(nodes = nodes.len(), transitions = count, "Geofence tick complete");
    count
}

/// Nodes currently inside each configured geofence, by geofence name.
///
/// Every configured geofence appears, possibly with no nodes.
#[must_use]
pub fn occupancy(nodes: &RegistrySnapshot, config: &Configuration) -> BTreeMap<String, Vec<NodeId>> {
    let mut occupancy: BTreeMap<String, Vec<NodeId>> = config
        .geofences
        .iter()
        .map(|g| (g.name.clone(), Vec::new()))
        .collect();

    for record in nodes.values() {
        for name in &record.geofences {
            if let Some(members) = occupancy.get_mut(name) {
                members.push(record.id.clone());
            }
        }
    }
    occupancy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geofence;
    use crate::registry::NodeRegistry;
    use crate::types::{EventKind, Position};
    use crate::geo::Coordinates;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn config_with(fences: Vec<Geofence>) -> Configuration {
        Configuration {
            geofences: fences,
            ..Configuration::default()
        }
    }

    fn base_camp() -> Geofence {
        Geofence {
            name: "Base".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            radius_km: 5.0,
        }
    }

    async fn place(registry: &NodeRegistry, id: &str, lat: f64, lon: f64, secs: i64) {
        registry
            .upsert_position(
                &NodeId::new(id),
                None,
                Position {
                    coordinates: Coordinates::new(lat, lon),
                    timestamp: t(secs),
                },
                Duration::seconds(300),
            )
            .await;
    }

    async fn run(registry: &NodeRegistry, config: &Configuration, now: DateTime<Utc>) -> Vec<NotificationEvent> {
        let nodes = registry.snapshot().await;
        let tick = evaluate(&nodes, config, now);
        registry.commit_membership(tick.updates).await;
        tick.events
    }

    #[tokio::test]
    async fn test_exit_then_enter_fires_once_each() {
        let registry = NodeRegistry::new();
        let config = config_with(vec![base_camp()]);

        place(&registry, "!1", 0.0, 0.04, 0).await;
        let first = run(&registry, &config, t(0)).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, EventKind::Enter);

        // Same position again: nothing.
        assert!(run(&registry, &config, t(10)).await.is_empty());

        place(&registry, "!1", 0.0, 0.05, 20).await;
        let exit = run(&registry, &config, t(20)).await;
        assert_eq!(exit.len(), 1);
        assert_eq!(exit[0].kind, EventKind::Exit);
        assert_eq!(exit[0].geofence.as_deref(), Some("Base"));
        assert_eq!(exit[0].payload.radius_km, Some(5.0));
        assert!((exit[0].payload.distance_km - 5.56).abs() < 0.01);
        assert!(run(&registry, &config, t(30)).await.is_empty());

        place(&registry, "!1", 0.0, 0.04, 40).await;
        let enter = run(&registry, &config, t(40)).await;
        assert_eq!(enter.len(), 1);
        assert_eq!(enter[0].kind, EventKind::Enter);
    }

    #[tokio::test]
    async fn test_boundary_counts_as_inside() {
        let registry = NodeRegistry::new();
        place(&registry, "!1", 0.0, 0.04, 0).await;
        let nodes = registry.snapshot().await;
        let distance = Coordinates::new(0.0, 0.04)
            .distance_km(&Coordinates::new(0.0, 0.0), crate::geo::EARTH_RADIUS_KM);

        let config = config_with(vec![Geofence {
            radius_km: distance,
            ..base_camp()
        }]);
        let tick = evaluate(&nodes, &config, t(0));
        assert_eq!(tick.events.len(), 1);
        assert_eq!(tick.events[0].kind, EventKind::Enter);
    }

    #[tokio::test]
    async fn test_removed_geofence_drops_membership_silently() {
        let registry = NodeRegistry::new();
        place(&registry, "!1", 0.0, 0.01, 0).await;
        run(&registry, &config_with(vec![base_camp()]), t(0)).await;

        let events = run(&registry, &config_with(Vec::new()), t(10)).await;
        assert!(events.is_empty());
        assert!(registry.get(&NodeId::new("!1")).await.unwrap().geofences.is_empty());
    }

    #[tokio::test]
    async fn test_occupancy_lists_every_geofence() {
        let registry = NodeRegistry::new();
        let far = Geofence {
            name: "Summit".to_string(),
            latitude: 45.0,
            longitude: 45.0,
            radius_km: 1.0,
        };
        let config = config_with(vec![base_camp(), far]);
        place(&registry, "!1", 0.0, 0.01, 0).await;
        place(&registry, "!2", 0.0, 0.02, 0).await;
        run(&registry, &config, t(0)).await;

        let occupancy = occupancy(&registry.snapshot().await, &config);
        assert_eq!(
            occupancy["Base"],
            vec![NodeId::new("!1"), NodeId::new("!2")]
        );
        assert!(occupancy["Summit"].is_empty());
    }
}
