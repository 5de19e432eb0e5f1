//! # meshfence-core
//!
//! Geofence and proximity state engine for nodes on a Meshtastic-style mesh.
//!
//! This crate provides:
//! - A registry of every node heard, with bounded position history
//! - Periodic geofence enter/exit detection
//! - Distance tracking relative to the local node
//! - Stationary / moving-again detection
//! - Deduplicated notification dispatch over a pluggable mesh transport
//! - Validated, hot-swappable configuration
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`registry`] - Authoritative per-node state behind a single async lock
//! - [`ingest`] - Sample validation, the [`PositionSource`] trait and producer loops
//! - [`geofence`] - Membership evaluation and occupancy
//! - [`distance`] - Reference distance tracking and threshold crossings
//! - [`stationary`] - Motion-window analysis
//! - [`dispatch`] - Cool-down, channel selection, formatting and the [`MeshTransport`] trait
//! - [`engine`] - Timer tasks, snapshot and shutdown
//! - [`config`] / [`config_manager`] - Configuration schema, persistence and live reload
//! - [`geo`] - Haversine distance
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod config_manager;
pub mod dispatch;
pub mod distance;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod ingest;
pub mod registry;
pub mod stationary;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    default_config_path, ChannelPolicy, ConfigError, ConfigField, ConfigPatch, ConfigResult,
    Configuration, Geofence, ReloadMode, REDACTED_PSK,
};
pub use config_manager::{ConfigManager, FieldChange, ProposalReport};
pub use dispatch::{format_text, DispatchRecord, MeshTransport, TransportError, RECENT_CAPACITY};
pub use engine::{Engine, EngineClock, EngineSnapshot, NodeView};
pub use error::{Error, MeshfenceError, Result};
pub use geo::{haversine_km, Coordinates, EARTH_RADIUS_KM};
pub use ingest::{IngestError, IngestOutcome, PositionSource, SourceError, SourceStatus};
pub use registry::{NodeRecord, NodeRegistry};
pub use types::{
    Channel, EventKind, EventPayload, NodeId, NotificationEvent, Position, PositionSample,
    SampleSource,
};
