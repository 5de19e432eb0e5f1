//! Unified error types for the meshfence core library.
//!
//! This module provides a unified error type [`MeshfenceError`] that covers every
//! failure mode of the engine. Each module also has its own specific error type
//! (`ConfigError`, `IngestError`, `SourceError`, `TransportError`) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Non-fatal**: Every variant degrades a single data path; none stops the engine
//! - **Context preservation**: Wrapped errors maintain their original context
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use meshfence_core::error::{MeshfenceError, Result};
//!
//! fn check_latitude(lat: f64) -> Result<()> {
//!     if !(-90.0..=90.0).contains(&lat) {
//!         return Err(MeshfenceError::MalformedSample(format!("latitude {lat} out of range")));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The unified error type for all meshfence operations.
#[derive(Debug, Error)]
pub enum MeshfenceError {
    // =========================================================================
    // INGEST ERRORS
    // =========================================================================
    /// A position sample carried coordinates that cannot be a real fix.
    #[error("Malformed position sample: {0}")]
    MalformedSample(String),

    /// A position sample was older than the node's last known position.
    #[error("Stale sample for node '{node_id}': {sample} is older than last position at {last}")]
    StaleSample {
        /// Node the sample belonged to.
        node_id: String,
        /// Timestamp carried by the rejected sample.
        sample: DateTime<Utc>,
        /// Timestamp of the node's current position.
        last: DateTime<Utc>,
    },

    /// A position source (GPS or mesh listener) is unavailable.
    #[error("Position source '{source_name}' disconnected: {reason}")]
    SourceDisconnected {
        /// Source name ("local" or "mesh").
        source_name: String,
        /// Reason reported by the source.
        reason: String,
    },

    // =========================================================================
    // NOTIFICATION ERRORS
    // =========================================================================
    /// The mesh transport failed to send a notification.
    #[error("Notification send failed: {0}")]
    TransportFailure(String),

    /// The engine has shut down and no longer accepts work.
    #[error("Engine is shutting down; the request was discarded")]
    EngineStopped,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for meshfence operations.
pub type Result<T> = std::result::Result<T, MeshfenceError>;

/// Short alias used across the crate.
pub type Error = MeshfenceError;

impl MeshfenceError {
    /// Returns `true` if this error was raised while ingesting a position.
    #[inline]
    #[must_use]
    pub const fn is_ingest_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedSample(_) | Self::StaleSample { .. } | Self::SourceDisconnected { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to notification delivery.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::EngineStopped)
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error represents an expected operational state.
    ///
    /// Reordered mesh packets routinely produce stale samples; they are not failures.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::StaleSample { .. })
    }

    /// Returns `true` if this error is likely to clear without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceDisconnected { .. } | Self::TransportFailure(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::MalformedSample(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - valid input that lost a race with newer data
            Self::StaleSample { .. } => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - radio or source issues
            Self::SourceDisconnected { .. } | Self::TransportFailure(_) | Self::EngineStopped => {
                503
            }
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedSample(_) => "MALFORMED_SAMPLE",
            Self::StaleSample { .. } => "STALE_SAMPLE",
            Self::SourceDisconnected { .. } => "SOURCE_DISCONNECTED",
            Self::TransportFailure(_) => "TRANSPORT_FAILURE",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for MeshfenceError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {}", path.display(), source))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            err @ ConfigError::ValidationError { .. } => {
                Self::ConfigValidationError(err.to_string())
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::ingest::IngestError> for MeshfenceError {
    fn from(err: crate::ingest::IngestError) -> Self {
        use crate::ingest::IngestError;
        match err {
            IngestError::Malformed { .. } => Self::MalformedSample(err.to_string()),
            IngestError::Stale {
                node_id,
                sample,
                last,
            } => Self::StaleSample {
                node_id: node_id.to_string(),
                sample,
                last,
            },
            IngestError::EngineStopped => Self::EngineStopped,
        }
    }
}

impl From<crate::ingest::SourceError> for MeshfenceError {
    fn from(err: crate::ingest::SourceError) -> Self {
        Self::SourceDisconnected {
            source_name: err.source_kind.to_string(),
            reason: err.reason,
        }
    }
}

impl From<crate::dispatch::TransportError> for MeshfenceError {
    fn from(err: crate::dispatch::TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn stale() -> MeshfenceError {
        let now = Utc::now();
        MeshfenceError::StaleSample {
            node_id: "!a1b2c3d4".into(),
            sample: now - chrono::Duration::seconds(5),
            last: now,
        }
    }

    #[test]
    fn test_ingest_error_classification() {
        assert!(MeshfenceError::MalformedSample("lat 91".into()).is_ingest_error());
        assert!(stale().is_ingest_error());
        assert!(MeshfenceError::SourceDisconnected {
            source_name: "mesh".into(),
            reason: "serial closed".into()
        }
        .is_ingest_error());

        assert!(!MeshfenceError::TransportFailure("radio".into()).is_ingest_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(MeshfenceError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(MeshfenceError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(MeshfenceError::ConfigValidationError("radius".into()).is_config_error());

        assert!(!MeshfenceError::EngineStopped.is_config_error());
    }

    #[test]
    fn test_transport_and_io_classification() {
        assert!(MeshfenceError::TransportFailure("no ack".into()).is_transport_error());
        assert!(MeshfenceError::EngineStopped.is_transport_error());
        assert!(MeshfenceError::PersistenceError("disk full".into()).is_io_error());
        assert!(MeshfenceError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!MeshfenceError::EngineStopped.is_io_error());
    }

    #[test]
    fn test_expected_and_recoverable() {
        assert!(stale().is_expected_state());
        assert!(!MeshfenceError::MalformedSample("x".into()).is_expected_state());
        assert!(MeshfenceError::TransportFailure("timeout".into()).is_recoverable());
        assert!(!MeshfenceError::ConfigParseError("bad".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            MeshfenceError::MalformedSample("bad".into()).http_status_code(),
            400
        );
        assert_eq!(stale().http_status_code(), 409);
        assert_eq!(
            MeshfenceError::ConfigValidationError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            MeshfenceError::PersistenceError("error".into()).http_status_code(),
            500
        );
        assert_eq!(MeshfenceError::EngineStopped.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(stale().error_code(), "STALE_SAMPLE");
        assert_eq!(
            MeshfenceError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
        assert_eq!(
            MeshfenceError::TransportFailure("x".into()).error_code(),
            "TRANSPORT_FAILURE"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: MeshfenceError = io_err.into();
        assert!(matches!(err, MeshfenceError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_display_messages() {
        let err = MeshfenceError::SourceDisconnected {
            source_name: "local".into(),
            reason: "serial port vanished".into(),
        };
        assert!(format!("{err}").contains("serial port vanished"));
        assert!(format!("{}", stale()).contains("!a1b2c3d4"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<MeshfenceError>();
        assert_sync::<MeshfenceError>();
    }
}
