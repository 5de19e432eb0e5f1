//! End-to-end engine behaviour on a paused tokio clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshfence_core::config::Geofence;
use meshfence_core::{
    Channel, ConfigManager, ConfigPatch, Configuration, Engine, EventKind, MeshTransport,
    NodeId, PositionSample, PositionSource, SampleSource, SourceError, TransportError,
};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<(Channel, String)>>>,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl MeshTransport for RecordingTransport {
    async fn send(&self, channel: Channel, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((channel, text.to_string()));
        Ok(())
    }
}

fn base_config() -> Configuration {
    let mut config = Configuration::default();
    config.transport.local_node_id = "!local".to_string();
    config.intervals.geofence_secs = 10;
    config.intervals.distance_secs = 10;
    config.intervals.stationary_secs = 10;
    config.distance.notify_threshold_km = 50.0;
    config.stationary.duration_secs = 600;
    config.stationary.epsilon_km = 0.01;
    config.geofences.push(Geofence {
        name: "Base".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        radius_km: 5.0,
    });
    config
}

fn start(config: Configuration) -> (Engine, RecordingTransport) {
    let transport = RecordingTransport::default();
    let manager = Arc::new(ConfigManager::new(config).unwrap());
    (Engine::start(manager, transport.clone()), transport)
}

async fn report(engine: &Engine, source: SampleSource, id: &str, lat: f64, lon: f64) {
    let outcome = engine
        .ingest(PositionSample {
            source,
            node_id: NodeId::new(id),
            name: Some("Trail Runner".to_string()),
            latitude: lat,
            longitude: lon,
            timestamp: engine.now(),
        })
        .await;
    assert!(outcome.is_accepted(), "{outcome:?}");
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn geofence_exit_and_reentry_notify_once_each() {
    let (engine, transport) = start(base_config());
    report(&engine, SampleSource::Local, "gps", 0.0, 1.0).await;
    report(&engine, SampleSource::Mesh, "!a1b2c3d4", 0.0, 0.04).await;
    sleep_secs(15).await;

    report(&engine, SampleSource::Mesh, "!a1b2c3d4", 0.0, 0.05).await;
    sleep_secs(10).await;
    sleep_secs(10).await;

    report(&engine, SampleSource::Mesh, "!a1b2c3d4", 0.0, 0.04).await;
    sleep_secs(10).await;

    let texts = transport.texts();
    assert_eq!(texts.len(), 3, "{texts:?}");
    assert!(texts[0].starts_with("Trail Runner (!a1b2c3d4) entered geofence 'Base'"));
    assert!(texts[1].starts_with("Trail Runner (!a1b2c3d4) exited geofence 'Base' (dist 5.56km"));
    assert!(texts[2].contains("entered geofence 'Base'"));

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.geofence_occupancy["Base"], vec![NodeId::new("!a1b2c3d4")]);
    assert_eq!(snapshot.recent_events.len(), 3);
    assert_eq!(snapshot.recent_events[0].event.kind, EventKind::Enter);
    assert!(snapshot.closest_node_km.is_some());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn parked_node_goes_stationary_then_moves_again() {
    let mut config = base_config();
    config.geofences.clear();
    config.stationary.duration_secs = 60;
    let (engine, transport) = start(config);

    report(&engine, SampleSource::Mesh, "!0000beef", 10.0, 10.0).await;
    sleep_secs(5).await;
    for _ in 0..8 {
        report(&engine, SampleSource::Mesh, "!0000beef", 10.0, 10.0).await;
        sleep_secs(10).await;
    }
    report(&engine, SampleSource::Mesh, "!0000beef", 10.0, 10.01).await;
    sleep_secs(10).await;

    let kinds: Vec<EventKind> = engine
        .snapshot()
        .await
        .recent_events
        .iter()
        .rev()
        .map(|record| record.event.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Stationary, EventKind::MovingAgain]);
    assert!(transport.texts()[0].contains("has been stationary for >60s"));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn distance_threshold_fires_once_per_crossing() {
    let mut config = base_config();
    config.geofences.clear();
    config.distance.notify_threshold_km = 0.5;
    let (engine, transport) = start(config);

    report(&engine, SampleSource::Local, "gps", 0.0, 0.0).await;
    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.01).await;
    sleep_secs(15).await;

    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.02).await;
    sleep_secs(10).await;
    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.021).await;
    sleep_secs(10).await;
    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.0195).await;
    sleep_secs(10).await;

    let texts = transport.texts();
    assert_eq!(texts.len(), 1, "{texts:?}");
    assert!(texts[0].contains("is now 2.22km away (was 1.11km)"));

    let closest = engine.closest_node_km();
    let nearest = (*closest.borrow()).unwrap();
    assert!((nearest - 2.17).abs() < 0.01, "got {nearest}");

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reload_removes_geofence_without_exit() {
    let (engine, transport) = start(base_config());
    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.01).await;
    sleep_secs(15).await;
    assert_eq!(transport.texts().len(), 1);

    let patch: ConfigPatch = serde_json::from_str(r#"{"geofences": []}"#).unwrap();
    let proposal = engine.config().apply_patch(patch).await.unwrap();
    assert_eq!(proposal.version, 2);

    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.01).await;
    sleep_secs(30).await;

    assert_eq!(transport.texts().len(), 1);
    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.config_version, 2);
    assert!(snapshot.geofence_occupancy.is_empty());
    assert!(snapshot.nodes[0].geofences.is_empty());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shortened_interval_takes_effect_without_waiting_out_old_period() {
    let mut config = base_config();
    config.intervals.geofence_secs = 3600;
    let (engine, transport) = start(config);
    sleep_secs(5).await;

    let patch: ConfigPatch =
        serde_json::from_str(r#"{"intervals": {"geofence_secs": 10}}"#).unwrap();
    engine.config().apply_patch(patch).await.unwrap();

    report(&engine, SampleSource::Mesh, "!1", 0.0, 0.01).await;
    sleep_secs(60).await;

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.geofence_occupancy["Base"], vec![NodeId::new("!1")]);
    assert_eq!(transport.texts().len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn future_dated_sample_cannot_freeze_a_node() {
    let (engine, _transport) = start(base_config());
    let bogus = PositionSample {
        source: SampleSource::Mesh,
        node_id: NodeId::new("!1"),
        name: None,
        latitude: 1.0,
        longitude: 1.0,
        timestamp: engine.now() + chrono::Duration::days(365 * 50),
    };
    assert!(!engine.ingest(bogus).await.is_accepted());

    sleep_secs(60).await;
    report(&engine, SampleSource::Mesh, "!1", 1.0, 1.0).await;
    assert_eq!(engine.snapshot().await.nodes.len(), 1);

    engine.shutdown().await;
}

struct ChannelSource {
    rx: mpsc::Receiver<Result<PositionSample, SourceError>>,
}

impl PositionSource for ChannelSource {
    fn name(&self) -> &str {
        "mesh-listener"
    }

    fn kind(&self) -> SampleSource {
        SampleSource::Mesh
    }

    async fn next_sample(&mut self) -> Result<Option<PositionSample>, SourceError> {
        self.rx.recv().await.transpose()
    }
}

#[tokio::test(start_paused = true)]
async fn producer_feeds_registry_and_reports_status() {
    let (engine, _transport) = start(base_config());
    let (tx, rx) = mpsc::channel(8);
    engine.spawn_producer(ChannelSource { rx });

    tx.send(Ok(PositionSample {
        source: SampleSource::Mesh,
        node_id: NodeId::new("!1"),
        name: None,
        latitude: 1.0,
        longitude: 1.0,
        timestamp: engine.now(),
    }))
    .await
    .unwrap();
    tx.send(Err(SourceError::new(SampleSource::Mesh, "link lost")))
        .await
        .unwrap();
    sleep_secs(1).await;

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.nodes.len(), 1);
    let status = &snapshot.sources[0];
    assert_eq!(status.name, "mesh-listener");
    assert_eq!(status.accepted, 1);
    assert!(!status.connected);
    assert_eq!(status.last_error.as_deref(), Some("link lost"));

    engine.shutdown().await;
}
