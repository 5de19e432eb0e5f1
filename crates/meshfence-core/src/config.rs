//! Engine configuration schema.
//!
//! The configuration is a fixed schema: every field is enumerated in [`ConfigField`]
//! and tagged as either reloadable at runtime or requiring a restart. It covers:
//! - Geofence definitions
//! - Evaluation intervals for the geofence, distance, stationary and cleanup timers
//! - Stationary epsilon/duration and the distance-change threshold
//! - Node freshness and stale-removal windows
//! - Notification channel policy
//! - Transport settings (restart only): local node id, PSK, serial port, HTTP listener
//!
//! Files are TOML, layered with `MESHFENCE__SECTION__KEY` environment overrides.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::geo::{Coordinates, EARTH_RADIUS_KM};
use crate::types::Channel;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "MESHFENCE_CONFIG";

/// PSK values that mean "no private channel configured".
const PLACEHOLDER_PSKS: &[&str] = &["changeme", "none", "default", "primary"];

/// Mask shown in place of a PSK by [`Configuration::redacted`].
pub const REDACTED_PSK: &str = "********";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file exists at the path.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The layered sources could not be deserialized into the schema.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Flatten into `(field, message)` pairs for API responses.
    #[must_use]
    pub fn violations(&self) -> Vec<(String, String)> {
        match self {
            Self::ValidationError { field, message } => vec![(field.clone(), message.clone())],
            Self::MultipleValidationErrors(errors) => {
                errors.iter().flat_map(Self::violations).collect()
            }
            other => vec![(String::new(), other.to_string())],
        }
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Schema
// ============================================================================

/// A circular geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Base Camp",
    "latitude": 47.6062,
    "longitude": -122.3321,
    "radius_km": 5.0
}))]
pub struct Geofence {
    /// Unique name, also the geofence id.
    pub name: String,

    /// Center latitude in degrees.
    pub latitude: f64,

    /// Center longitude in degrees.
    pub longitude: f64,

    /// Radius in kilometers, must be positive.
    pub radius_km: f64,
}

impl Geofence {
    /// Center of the geofence.
    #[must_use]
    pub const fn center(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Timer periods, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Intervals {
    /// Geofence evaluation period.
    #[schema(example = 10)]
    pub geofence_secs: u64,

    /// Distance tracker period.
    #[schema(example = 10)]
    pub distance_secs: u64,

    /// Stationary detector period.
    #[schema(example = 10)]
    pub stationary_secs: u64,

    /// Stale node cleanup period.
    #[schema(example = 3600)]
    pub cleanup_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            geofence_secs: 10,
            distance_secs: 10,
            stationary_secs: 10,
            cleanup_secs: 3600,
        }
    }
}

/// Stationary detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct StationarySettings {
    /// Maximum spread of positions, in kilometers, for a node to count as stationary.
    #[schema(example = 0.05)]
    pub epsilon_km: f64,

    /// How long a node must stay within epsilon, in seconds.
    #[schema(example = 300)]
    pub duration_secs: u64,
}

impl Default for StationarySettings {
    fn default() -> Self {
        Self {
            epsilon_km: 0.05,
            duration_secs: 300,
        }
    }
}

/// Distance tracker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DistanceSettings {
    /// Change in distance to the local node, in kilometers, that triggers a notification.
    #[schema(example = 0.5)]
    pub notify_threshold_km: f64,
}

impl Default for DistanceSettings {
    fn default() -> Self {
        Self {
            notify_threshold_km: 0.5,
        }
    }
}

/// Node lifecycle windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct NodeSettings {
    /// Nodes without a sample for this long are removed.
    #[schema(example = 7200)]
    pub stale_timeout_secs: u64,

    /// Positions older than this are flagged stale in snapshots.
    #[schema(example = 900)]
    pub freshness_secs: u64,

    /// Pause before a disconnected position source is polled again.
    #[schema(example = 15)]
    pub reconnect_delay_secs: u64,

    /// Samples dated further than this ahead of the local clock are rejected.
    #[schema(example = 300)]
    pub max_clock_skew_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            stale_timeout_secs: 7200,
            freshness_secs: 900,
            reconnect_delay_secs: 15,
            max_clock_skew_secs: 300,
        }
    }
}

/// How notifications choose a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// Use the private channel whenever a real PSK is configured.
    #[default]
    PreferPrivate,
    /// Always broadcast on the primary channel.
    PrimaryOnly,
}

/// Notification channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ChannelSettings {
    /// Channel selection policy.
    pub policy: ChannelPolicy,
}

/// Settings consumed by the transport and source collaborators at startup.
///
/// Changes are stored but only take effect after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TransportSettings {
    /// Node id under which local GPS fixes are recorded.
    #[schema(example = "!a1b2c3d4")]
    pub local_node_id: String,

    /// Pre-shared key of the private channel. Empty or a placeholder selects primary.
    pub private_channel_psk: String,

    /// Serial device of the GPS receiver. Empty disables local GPS.
    #[schema(example = "/dev/ttyUSB0")]
    pub gps_serial_port: String,

    /// GPS serial baud rate.
    #[schema(example = 9600)]
    pub gps_baud_rate: u32,

    /// HTTP listen host.
    #[schema(example = "0.0.0.0")]
    pub http_host: String,

    /// HTTP listen port.
    #[schema(example = 3000)]
    pub http_port: u16,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            local_node_id: "self".to_string(),
            private_channel_psk: "changeme".to_string(),
            gps_serial_port: "/dev/ttyUSB0".to_string(),
            gps_baud_rate: 9600,
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
        }
    }
}

impl TransportSettings {
    /// Whether a usable private channel key is configured.
    #[must_use]
    pub fn has_private_psk(&self) -> bool {
        let psk = self.private_channel_psk.trim();
        !psk.is_empty()
            && !PLACEHOLDER_PSKS
                .iter()
                .any(|placeholder| psk.eq_ignore_ascii_case(placeholder))
    }
}

/// A complete configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Configuration {
    /// Snapshot version assigned by the config manager. Not persisted.
    #[serde(skip)]
    pub version: u64,

    /// Earth radius used for every distance computation.
    #[schema(example = 6371.0)]
    pub geodetic_radius_km: f64,

    /// Circular geofences.
    pub geofences: Vec<Geofence>,

    /// Timer periods.
    pub intervals: Intervals,

    /// Stationary detection.
    pub stationary: StationarySettings,

    /// Distance tracking.
    pub distance: DistanceSettings,

    /// Node lifecycle.
    pub nodes: NodeSettings,

    /// Channel selection.
    pub channel: ChannelSettings,

    /// Restart-only transport settings.
    pub transport: TransportSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: 0,
            geodetic_radius_km: EARTH_RADIUS_KM,
            geofences: Vec::new(),
            intervals: Intervals::default(),
            stationary: StationarySettings::default(),
            distance: DistanceSettings::default(),
            nodes: NodeSettings::default(),
            channel: ChannelSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

const fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn span(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Configuration {
    /// Load configuration from `path`, falling back to defaults when it does not exist.
    ///
    /// Environment variables of the form `MESHFENCE__INTERVALS__GEOFENCE_SECS`
    /// override file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or the result is invalid.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Configuration file not found, using defaults");
        }

        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("MESHFENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// See [`Configuration::load`].
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&default_config_path())
    }

    /// Save configuration to `path` as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns every violation found, not just the first.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for (i, fence) in self.geofences.iter().enumerate() {
            let field = format!("geofences[{i}]");
            if fence.name.trim().is_empty() {
                errors.push(ConfigError::invalid(format!("{field}.name"), "must not be empty"));
            } else if !names.insert(fence.name.as_str()) {
                errors.push(ConfigError::invalid(
                    format!("{field}.name"),
                    format!("duplicate geofence name '{}'", fence.name),
                ));
            }
            if !fence.radius_km.is_finite() || fence.radius_km <= 0.0 {
                errors.push(ConfigError::invalid(
                    format!("{field}.radius_km"),
                    "must be greater than 0",
                ));
            }
            if !fence.center().in_range() {
                errors.push(ConfigError::invalid(
                    format!("{field}.center"),
                    "latitude must be within -90..=90 and longitude within -180..=180",
                ));
            }
        }

        let intervals = [
            ("intervals.geofence_secs", self.intervals.geofence_secs),
            ("intervals.distance_secs", self.intervals.distance_secs),
            ("intervals.stationary_secs", self.intervals.stationary_secs),
            ("intervals.cleanup_secs", self.intervals.cleanup_secs),
            ("stationary.duration_secs", self.stationary.duration_secs),
            ("nodes.stale_timeout_secs", self.nodes.stale_timeout_secs),
            ("nodes.freshness_secs", self.nodes.freshness_secs),
            ("nodes.reconnect_delay_secs", self.nodes.reconnect_delay_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                errors.push(ConfigError::invalid(field, "must be greater than 0"));
            }
        }

        let thresholds = [
            ("stationary.epsilon_km", self.stationary.epsilon_km),
            ("distance.notify_threshold_km", self.distance.notify_threshold_km),
        ];
        for (field, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                errors.push(ConfigError::invalid(field, "must be 0 or greater"));
            }
        }

        if !self.geodetic_radius_km.is_finite() || self.geodetic_radius_km <= 0.0 {
            errors.push(ConfigError::invalid(
                "geodetic_radius_km",
                "must be greater than 0",
            ));
        }

        if self.transport.local_node_id.trim().is_empty() {
            errors.push(ConfigError::invalid(
                "transport.local_node_id",
                "must not be empty",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Fields whose values differ between `self` and `other`, in schema order.
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> Vec<ConfigField> {
        ConfigField::ALL
            .iter()
            .copied()
            .filter(|field| !field.same_in(self, other))
            .collect()
    }

    /// Copy of this configuration with its restart-only settings replaced by `transport`.
    #[must_use]
    pub fn with_transport(&self, transport: &TransportSettings) -> Self {
        Self {
            transport: transport.clone(),
            ..self.clone()
        }
    }

    /// Copy safe to hand to API clients: the PSK is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.transport.private_channel_psk.is_empty() {
            copy.transport.private_channel_psk = REDACTED_PSK.to_string();
        }
        copy
    }

    /// Channel notifications should go out on.
    #[must_use]
    pub fn notification_channel(&self) -> Channel {
        match self.channel.policy {
            ChannelPolicy::PreferPrivate if self.transport.has_private_psk() => Channel::Private,
            _ => Channel::Primary,
        }
    }

    /// Geofence timer period.
    #[must_use]
    pub const fn geofence_interval(&self) -> Duration {
        secs(self.intervals.geofence_secs)
    }

    /// Distance timer period.
    #[must_use]
    pub const fn distance_interval(&self) -> Duration {
        secs(self.intervals.distance_secs)
    }

    /// Stationary timer period.
    #[must_use]
    pub const fn stationary_interval(&self) -> Duration {
        secs(self.intervals.stationary_secs)
    }

    /// Stale cleanup timer period.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        secs(self.intervals.cleanup_secs)
    }

    /// Stationary duration threshold, also the registry history window.
    #[must_use]
    pub fn stationary_window(&self) -> chrono::Duration {
        span(self.stationary.duration_secs)
    }

    /// Node removal timeout.
    #[must_use]
    pub fn stale_timeout(&self) -> chrono::Duration {
        span(self.nodes.stale_timeout_secs)
    }

    /// Position freshness window.
    #[must_use]
    pub fn freshness_window(&self) -> chrono::Duration {
        span(self.nodes.freshness_secs)
    }

    /// Source reconnect pause.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        secs(self.nodes.reconnect_delay_secs)
    }

    /// How far ahead of the local clock a sample may be dated.
    #[must_use]
    pub fn max_clock_skew(&self) -> chrono::Duration {
        span(self.nodes.max_clock_skew_secs)
    }
}

// ============================================================================
// Field catalogue
// ============================================================================

/// When a change to a field takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMode {
    /// Picked up by the next evaluation tick.
    Live,
    /// Stored, effective after a process restart.
    Restart,
}

/// Every configurable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConfigField {
    Geofences,
    GeofenceInterval,
    DistanceInterval,
    StationaryInterval,
    CleanupInterval,
    StationaryEpsilon,
    StationaryDuration,
    DistanceThreshold,
    StaleTimeout,
    Freshness,
    ReconnectDelay,
    MaxClockSkew,
    ChannelPolicy,
    GeodeticRadius,
    LocalNodeId,
    PrivateChannelPsk,
    GpsSerialPort,
    GpsBaudRate,
    HttpHost,
    HttpPort,
}

impl ConfigField {
    /// All fields in schema order.
    pub const ALL: [Self; 20] = [
        Self::Geofences,
        Self::GeofenceInterval,
        Self::DistanceInterval,
        Self::StationaryInterval,
        Self::CleanupInterval,
        Self::StationaryEpsilon,
        Self::StationaryDuration,
        Self::DistanceThreshold,
        Self::StaleTimeout,
        Self::Freshness,
        Self::ReconnectDelay,
        Self::MaxClockSkew,
        Self::ChannelPolicy,
        Self::GeodeticRadius,
        Self::LocalNodeId,
        Self::PrivateChannelPsk,
        Self::GpsSerialPort,
        Self::GpsBaudRate,
        Self::HttpHost,
        Self::HttpPort,
    ];

    /// Dotted path of the field in the configuration document.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Geofences => "geofences",
            Self::GeofenceInterval => "intervals.geofence_secs",
            Self::DistanceInterval => "intervals.distance_secs",
            Self::StationaryInterval => "intervals.stationary_secs",
            Self::CleanupInterval => "intervals.cleanup_secs",
            Self::StationaryEpsilon => "stationary.epsilon_km",
            Self::StationaryDuration => "stationary.duration_secs",
            Self::DistanceThreshold => "distance.notify_threshold_km",
            Self::StaleTimeout => "nodes.stale_timeout_secs",
            Self::Freshness => "nodes.freshness_secs",
            Self::ReconnectDelay => "nodes.reconnect_delay_secs",
            Self::MaxClockSkew => "nodes.max_clock_skew_secs",
            Self::ChannelPolicy => "channel.policy",
            Self::GeodeticRadius => "geodetic_radius_km",
            Self::LocalNodeId => "transport.local_node_id",
            Self::PrivateChannelPsk => "transport.private_channel_psk",
            Self::GpsSerialPort => "transport.gps_serial_port",
            Self::GpsBaudRate => "transport.gps_baud_rate",
            Self::HttpHost => "transport.http_host",
            Self::HttpPort => "transport.http_port",
        }
    }

    /// Whether the field reloads live or needs a restart.
    #[must_use]
    pub const fn reload_mode(self) -> ReloadMode {
        match self {
            Self::LocalNodeId
            | Self::PrivateChannelPsk
            | Self::GpsSerialPort
            | Self::GpsBaudRate
            | Self::HttpHost
            | Self::HttpPort => ReloadMode::Restart,
            _ => ReloadMode::Live,
        }
    }

    #[allow(clippy::float_cmp)]
    fn same_in(self, a: &Configuration, b: &Configuration) -> bool {
        match self {
            Self::Geofences => a.geofences == b.geofences,
            Self::GeofenceInterval => a.intervals.geofence_secs == b.intervals.geofence_secs,
            Self::DistanceInterval => a.intervals.distance_secs == b.intervals.distance_secs,
            Self::StationaryInterval => a.intervals.stationary_secs == b.intervals.stationary_secs,
            Self::CleanupInterval => a.intervals.cleanup_secs == b.intervals.cleanup_secs,
            Self::StationaryEpsilon => a.stationary.epsilon_km == b.stationary.epsilon_km,
            Self::StationaryDuration => a.stationary.duration_secs == b.stationary.duration_secs,
            Self::DistanceThreshold => {
                a.distance.notify_threshold_km == b.distance.notify_threshold_km
            }
            Self::StaleTimeout => a.nodes.stale_timeout_secs == b.nodes.stale_timeout_secs,
            Self::Freshness => a.nodes.freshness_secs == b.nodes.freshness_secs,
            Self::ReconnectDelay => a.nodes.reconnect_delay_secs == b.nodes.reconnect_delay_secs,
            Self::MaxClockSkew => a.nodes.max_clock_skew_secs == b.nodes.max_clock_skew_secs,
            Self::ChannelPolicy => a.channel.policy == b.channel.policy,
            Self::GeodeticRadius => a.geodetic_radius_km == b.geodetic_radius_km,
            Self::LocalNodeId => a.transport.local_node_id == b.transport.local_node_id,
            Self::PrivateChannelPsk => {
                a.transport.private_channel_psk == b.transport.private_channel_psk
            }
            Self::GpsSerialPort => a.transport.gps_serial_port == b.transport.gps_serial_port,
            Self::GpsBaudRate => a.transport.gps_baud_rate == b.transport.gps_baud_rate,
            Self::HttpHost => a.transport.http_host == b.transport.http_host,
            Self::HttpPort => a.transport.http_port == b.transport.http_port,
        }
    }
}

// ============================================================================
// Partial edits
// ============================================================================

/// A partial configuration document. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[schema(example = json!({
    "geofences": [{ "name": "Base Camp", "latitude": 0.0, "longitude": 0.0, "radius_km": 5.0 }],
    "stationary": { "epsilon_km": 0.01 }
}))]
pub struct ConfigPatch {
    /// Replacement geofence list (the list is swapped wholesale).
    pub geofences: Option<Vec<Geofence>>,
    /// Timer periods.
    pub intervals: Option<IntervalsPatch>,
    /// Stationary detection.
    pub stationary: Option<StationaryPatch>,
    /// Distance tracking.
    pub distance: Option<DistancePatch>,
    /// Node lifecycle.
    pub nodes: Option<NodesPatch>,
    /// Channel selection.
    pub channel: Option<ChannelPatch>,
    /// Earth radius.
    pub geodetic_radius_km: Option<f64>,
    /// Restart-only transport settings.
    pub transport: Option<TransportPatch>,
}

/// Partial [`Intervals`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct IntervalsPatch {
    pub geofence_secs: Option<u64>,
    pub distance_secs: Option<u64>,
    pub stationary_secs: Option<u64>,
    pub cleanup_secs: Option<u64>,
}

/// Partial [`StationarySettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct StationaryPatch {
    pub epsilon_km: Option<f64>,
    pub duration_secs: Option<u64>,
}

/// Partial [`DistanceSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct DistancePatch {
    pub notify_threshold_km: Option<f64>,
}

/// Partial [`NodeSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct NodesPatch {
    pub stale_timeout_secs: Option<u64>,
    pub freshness_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub max_clock_skew_secs: Option<u64>,
}

/// Partial [`ChannelSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct ChannelPatch {
    pub policy: Option<ChannelPolicy>,
}

/// Partial [`TransportSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct TransportPatch {
    pub local_node_id: Option<String>,
    pub private_channel_psk: Option<String>,
    pub gps_serial_port: Option<String>,
    pub gps_baud_rate: Option<u32>,
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl ConfigPatch {
    /// Apply this patch on top of `base`, returning the merged configuration.
    #[must_use]
    pub fn apply_to(self, base: &Configuration) -> Configuration {
        let mut next = base.clone();

        merge(&mut next.geofences, self.geofences);
        if let Some(p) = self.intervals {
            merge(&mut next.intervals.geofence_secs, p.geofence_secs);
            merge(&mut next.intervals.distance_secs, p.distance_secs);
            merge(&mut next.intervals.stationary_secs, p.stationary_secs);
            merge(&mut next.intervals.cleanup_secs, p.cleanup_secs);
        }
        if let Some(p) = self.stationary {
            merge(&mut next.stationary.epsilon_km, p.epsilon_km);
            merge(&mut next.stationary.duration_secs, p.duration_secs);
        }
        if let Some(p) = self.distance {
            merge(&mut next.distance.notify_threshold_km, p.notify_threshold_km);
        }
        if let Some(p) = self.nodes {
            merge(&mut next.nodes.stale_timeout_secs, p.stale_timeout_secs);
            merge(&mut next.nodes.freshness_secs, p.freshness_secs);
            merge(&mut next.nodes.reconnect_delay_secs, p.reconnect_delay_secs);
            merge(&mut next.nodes.max_clock_skew_secs, p.max_clock_skew_secs);
        }
        if let Some(p) = self.channel {
            merge(&mut next.channel.policy, p.policy);
        }
        merge(&mut next.geodetic_radius_km, self.geodetic_radius_km);
        if let Some(p) = self.transport {
            merge(&mut next.transport.local_node_id, p.local_node_id);
            merge(&mut next.transport.private_channel_psk, p.private_channel_psk);
            merge(&mut next.transport.gps_serial_port, p.gps_serial_port);
            merge(&mut next.transport.gps_baud_rate, p.gps_baud_rate);
            merge(&mut next.transport.http_host, p.http_host);
            merge(&mut next.transport.http_port, p.http_port);
        }

        next
    }
}

/// Resolve the configuration file path.
///
/// `MESHFENCE_CONFIG` wins; otherwise `/etc/meshfence/config.toml` on Linux and the
/// platform config directory elsewhere.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/meshfence/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "meshfence").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(name: &str, radius_km: f64) -> Geofence {
        Geofence {
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            radius_km,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.geodetic_radius_km, EARTH_RADIUS_KM);
        assert_eq!(config.notification_channel(), Channel::Primary);
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = Configuration::default();
        config.geofences = vec![fence("Base", 0.0), fence("Base", 1.0)];
        config.intervals.distance_secs = 0;
        config.stationary.epsilon_km = -0.1;

        let err = config.validate().unwrap_err();
        let fields: Vec<String> = err.violations().into_iter().map(|(f, _)| f).collect();
        assert!(fields.contains(&"geofences[0].radius_km".to_string()));
        assert!(fields.contains(&"geofences[1].name".to_string()));
        assert!(fields.contains(&"intervals.distance_secs".to_string()));
        assert!(fields.contains(&"stationary.epsilon_km".to_string()));
        assert!(matches!(err, ConfigError::MultipleValidationErrors(_)));
    }

    #[test]
    fn test_zero_thresholds_are_allowed() {
        let mut config = Configuration::default();
        config.stationary.epsilon_km = 0.0;
        config.distance.notify_threshold_km = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_stationary_duration_is_rejected() {
        let mut config = Configuration::default();
        config.stationary.duration_secs = 0;

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.violations(),
            vec![(
                "stationary.duration_secs".to_string(),
                "must be greater than 0".to_string()
            )]
        );
    }

    #[test]
    fn test_clock_skew_is_patchable_live() {
        let base = Configuration::default();
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"nodes": {"max_clock_skew_secs": 60}}"#).unwrap();
        let next = patch.apply_to(&base);

        assert_eq!(next.max_clock_skew(), chrono::Duration::seconds(60));
        assert_eq!(next.changed_fields(&base), vec![ConfigField::MaxClockSkew]);
        assert_eq!(ConfigField::MaxClockSkew.reload_mode(), ReloadMode::Live);
    }

    #[test]
    fn test_single_violation_is_not_wrapped() {
        let mut config = Configuration::default();
        config.geofences = vec![fence("Base", f64::NAN)];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_placeholder_psk_selects_primary() {
        let mut config = Configuration::default();
        for psk in ["", "  ", "changeme", "NONE", "Default", "primary"] {
            config.transport.private_channel_psk = psk.to_string();
            assert_eq!(config.notification_channel(), Channel::Primary, "psk {psk:?}");
        }

        config.transport.private_channel_psk = "s3cr3t".to_string();
        assert_eq!(config.notification_channel(), Channel::Private);

        config.channel.policy = ChannelPolicy::PrimaryOnly;
        assert_eq!(config.notification_channel(), Channel::Primary);
    }

    #[test]
    fn test_changed_fields_and_reload_modes() {
        let base = Configuration::default();
        let mut next = base.clone();
        next.geofences.push(fence("Base", 1.0));
        next.transport.http_port = 8080;

        let changed = next.changed_fields(&base);
        assert_eq!(changed, vec![ConfigField::Geofences, ConfigField::HttpPort]);
        assert_eq!(ConfigField::Geofences.reload_mode(), ReloadMode::Live);
        assert_eq!(ConfigField::HttpPort.reload_mode(), ReloadMode::Restart);
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let base = Configuration::default();
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"stationary": {"epsilon_km": 0.01}, "transport": {"http_port": 8080}}"#,
        )
        .unwrap();

        let merged = patch.apply_to(&base);
        assert_eq!(merged.stationary.epsilon_km, 0.01);
        assert_eq!(merged.stationary.duration_secs, base.stationary.duration_secs);
        assert_eq!(merged.transport.http_port, 8080);
        assert_eq!(merged.transport.http_host, base.transport.http_host);
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result = serde_json::from_str::<ConfigPatch>(r#"{"web_colour": "blue"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Configuration::default();
        config.geofences.push(fence("Base", 5.0));
        config.intervals.geofence_secs = 30;
        config.save(&path).unwrap();

        let loaded = Configuration::load(&path).unwrap();
        assert_eq!(loaded.geofences, config.geofences);
        assert_eq!(loaded.intervals.geofence_secs, 30);
        assert_eq!(loaded.version, 0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Configuration::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.intervals, Intervals::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[geofences]]\nname = \"Base\"\nlatitude = 0.0\nlongitude = 0.0\nradius_km = -1.0\n",
        )
        .unwrap();

        let err = Configuration::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_redacted_masks_psk() {
        let mut config = Configuration::default();
        config.transport.private_channel_psk = "s3cr3t".to_string();
        assert_eq!(config.redacted().transport.private_channel_psk, "********");
    }
}
