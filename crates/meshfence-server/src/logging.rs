//! Tracing subscriber setup for the gateway daemon.
//!
//! On the gateway (`production`) every event is written twice: as JSON lines to
//! a daily file and as compact text on stdout for the journal. On a workstation
//! (`development`) events go to stdout only, pretty-printed with span open/close.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the default log filter.
pub const LOG_LEVEL_ENV: &str = "MESHFENCE_LOG_LEVEL";

/// Environment variable selecting the profile (`production` or `development`).
pub const ENVIRONMENT_ENV: &str = "MESHFENCE_ENV";

/// Filter used when neither `RUST_LOG` nor `MESHFENCE_LOG_LEVEL` is set.
const DEFAULT_FILTER: &str = "info,tower_http=info";

static GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Output profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProfile {
    /// JSON file plus journal-friendly stdout.
    Production,
    /// Pretty stdout only.
    Development,
}

impl LogProfile {
    /// Profile named by `value`; anything but `production` means development.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Profile from `MESHFENCE_ENV`, defaulting to production in release builds.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(ENVIRONMENT_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) if cfg!(debug_assertions) => Self::Development,
            Err(_) => Self::Production,
        }
    }
}

/// Whether the production profile is selected.
#[must_use]
pub fn is_production() -> bool {
    LogProfile::from_env() == LogProfile::Production
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `MESHFENCE_LOG_LEVEL`. Mesh notifications are logged under
/// the `meshfence::mesh` target, so `MESHFENCE_LOG_LEVEL=warn,meshfence::mesh=info`
/// keeps only the outbound texts and problems.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let directive = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?;

    if is_production {
        init_gateway(env_filter);
    } else {
        init_workstation(env_filter);
    }
    Ok(())
}

fn init_gateway(env_filter: EnvFilter) {
    let log_dir = log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("meshfence: cannot create {}: {e}", log_dir.display());
    }

    let (file_writer, file_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        &log_dir,
        "meshfence.log",
    ));
    let (journal_writer, journal_guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(journal_writer)
                .with_ansi(false),
        )
        .init();

    let _ = GUARDS.set([file_guard, journal_guard]);
}

fn init_workstation(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
        )
        .init();
}

/// `/var/log/meshfence` on Linux, the per-user data dir elsewhere.
fn log_directory() -> PathBuf {
    if cfg!(target_os = "linux") {
        return PathBuf::from("/var/log/meshfence");
    }
    directories::ProjectDirs::from("", "", "meshfence")
        .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
}
