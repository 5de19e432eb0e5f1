//! Notification dispatch.
//!
//! Evaluators hand events to an [`EventSender`]; a single dispatcher task receives
//! them, suppresses repeats within the producing component's cool-down, picks the
//! channel, formats the text and passes it to the [`MeshTransport`]. Every handled
//! event is kept in a small ring for the dashboard.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::Configuration;
use crate::config_manager::ConfigManager;
use crate::registry::NodeRegistry;
use crate::types::{Channel, EventKind, NotificationEvent};

/// Number of dispatch records kept for the dashboard.
pub const RECENT_CAPACITY: usize = 50;

/// Capacity of the event queue between evaluators and the dispatcher.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Subtracted from each cool-down so back-to-back ticks are never suppressed by timer jitter.
const COOLDOWN_SLACK_MS: i64 = 250;

/// The mesh transport failed to send a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Send on {channel} channel failed: {reason}")]
pub struct TransportError {
    /// Channel the message was meant for.
    pub channel: Channel,
    /// Reason reported by the radio link.
    pub reason: String,
}

impl TransportError {
    /// Build a transport error.
    pub fn new(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}

/// Outbound text link to the mesh radio.
pub trait MeshTransport: Send + Sync + 'static {
    /// Send `text` on `channel`.
    fn send(
        &self,
        channel: Channel,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Cloneable handle evaluators use to submit events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<NotificationEvent>,
}

impl EventSender {
    /// Queue an event for dispatch. Returns `false` once the dispatcher has stopped.
    pub async fn submit(&self, event: NotificationEvent) -> bool {
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(node_id = %event.node_id, kind = %event.kind, "Dispatcher stopped; discarding event");
                false
            }
        }
    }
}

/// Create the event queue.
#[must_use]
pub fn event_queue() -> (EventSender, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    (EventSender { tx }, rx)
}

/// A handled notification, as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DispatchRecord {
    /// The event that was dispatched.
    pub event: NotificationEvent,

    /// Channel it went out on.
    pub channel: Channel,

    /// Text handed to the transport.
    #[schema(example = "Trail Runner (!a1b2c3d4) exited geofence 'Base Camp' (dist 5.56km > radius 5km).")]
    pub text: String,

    /// Whether the transport accepted it.
    pub delivered: bool,

    /// Transport error, if delivery failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the dispatcher handled it.
    pub dispatched_at: DateTime<Utc>,
}

/// Bounded ring of recent dispatch records, newest last.
#[derive(Debug, Clone, Default)]
pub struct RecentDispatches {
    records: Arc<RwLock<VecDeque<DispatchRecord>>>,
}

impl RecentDispatches {
    async fn push(&self, record: DispatchRecord) {
        let mut records = self.records.write().await;
        if records.len() == RECENT_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records newest first.
    pub async fn list(&self) -> Vec<DispatchRecord> {
        self.records.read().await.iter().rev().cloned().collect()
    }
}

/// Human-readable text for an event.
#[must_use]
pub fn format_text(event: &NotificationEvent) -> String {
    let who = format!("{} ({})", event.display_name(), event.node_id);
    let payload = &event.payload;
    let geofence = event.geofence.as_deref().unwrap_or_default();

    match event.kind {
        EventKind::Enter => format!(
            "{who} entered geofence '{geofence}' (dist {:.2}km <= radius {}km).",
            payload.distance_km,
            payload.radius_km.unwrap_or_default()
        ),
        EventKind::Exit => format!(
            "{who} exited geofence '{geofence}' (dist {:.2}km > radius {}km).",
            payload.distance_km,
            payload.radius_km.unwrap_or_default()
        ),
        EventKind::DistanceThreshold => format!(
            "{who} is now {:.2}km away (was {:.2}km).",
            payload.distance_km,
            payload.previous_km.unwrap_or_default()
        ),
        EventKind::Stationary => format!(
            "{who} has been stationary for >{}s (moved {:.1}m).",
            payload.window_secs.unwrap_or_default(),
            payload.distance_km * 1000.0
        ),
        EventKind::MovingAgain => format!(
            "{who} is moving again (moved {:.1}m in {}s).",
            payload.distance_km * 1000.0,
            payload.window_secs.unwrap_or_default()
        ),
    }
}

/// Cool-down for events of `kind`: the interval of the component that produces them.
#[must_use]
pub fn cooldown(config: &Configuration, kind: EventKind) -> chrono::Duration {
    let interval = match kind {
        EventKind::Enter | EventKind::Exit => config.geofence_interval(),
        EventKind::DistanceThreshold => config.distance_interval(),
        EventKind::Stationary | EventKind::MovingAgain => config.stationary_interval(),
    };
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
    let slack = chrono::Duration::milliseconds(COOLDOWN_SLACK_MS);
    if interval > slack {
        interval - slack
    } else {
        chrono::Duration::zero()
    }
}

/// Consumes the event queue and talks to the transport.
pub struct Dispatcher<T> {
    transport: T,
    registry: NodeRegistry,
    config: Arc<ConfigManager>,
    recent: RecentDispatches,
}

impl<T: MeshTransport> Dispatcher<T> {
    /// Create a dispatcher writing its records into `recent`.
    pub fn new(
        transport: T,
        registry: NodeRegistry,
        config: Arc<ConfigManager>,
        recent: RecentDispatches,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
            recent,
        }
    }

    /// Dispatch one event. Returns `None` when it was suppressed as a repeat.
    pub async fn handle(&self, event: NotificationEvent) -> Option<DispatchRecord> {
        let config = self.config.current();

        let allowed = self
            .registry
            .try_mark_notified(
                &event.node_id,
                event.notify_key(),
                event.timestamp,
                cooldown(&config, event.kind),
            )
            .await;
        if !allowed {
            debug!(node_id = %event.node_id, kind = %event.kind, "Suppressed repeat notification");
            return None;
        }

        let channel = config.notification_channel();
        let text = format_text(&event);
        let result = self.transport.send(channel, &text).await;

        let error = match result {
            Ok(()) => {
                info!(node_id = %event.node_id, kind = %event.kind, %channel, "Notification sent");
                None
            }
            Err(err) => {
                warn!(node_id = %event.node_id, kind = %event.kind, error = %err, "Notification dropped");
                Some(err.reason)
            }
        };

        let record = DispatchRecord {
            event,
            channel,
            text,
            delivered: error.is_none(),
            error,
            dispatched_at: Utc::now(),
        };
        self.recent.push(record.clone()).await;
        Some(record)
    }

    /// Handle events until `token` is cancelled, then drain what is already queued.
    pub async fn run(self, mut events: mpsc::Receiver<NotificationEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => return,
                },
            }
        }

        events.close();
        let mut drained = 0_usize;
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            drained += 1;
        }
        info!(drained, "Dispatcher stopped");
    }
}
