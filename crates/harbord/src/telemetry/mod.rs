//! Structured telemetry routed through the runtime context.
//!
//! One global subscriber is installed per process. It never captures sink
//! handles itself: every event resolves the active [`LogSinkSet`] through the
//! [`RuntimeContext`], so rotation and reload only have to swap the context.

mod sinks;
mod writer;

use std::io;

use camino::Utf8PathBuf;
use harbor_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::warn;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Registry, fmt, reload};

pub use self::sinks::LogSinkSet;
use self::writer::SinkWriter;
use crate::context::RuntimeContext;

/// Prefix shared by every target this crate logs under.
pub(crate) const TARGET_PREFIX: &str = concat!(env!("CARGO_PKG_NAME"), "::");
pub(crate) const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static TELEMETRY: OnceCell<TelemetryHandle> = OnceCell::new();

/// Errors encountered while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log directory could not be created.
    #[error("failed to create log directory '{path}': {source}")]
    CreateDir {
        /// Directory path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A log file could not be opened.
    #[error("failed to open log file '{path}': {source}")]
    OpenFile {
        /// File path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Builds sink sets and installs the subscriber that writes to them.
pub trait SinkFactory: Send + Sync {
    /// Opens the sinks described by `config`.
    fn open(&self, config: &Config) -> Result<LogSinkSet, TelemetryError>;

    /// Routes process telemetry through `context`.
    fn install(&self, context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError>;
}

/// Factory that opens real files and installs the global subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSinkFactory;

impl SinkFactory for SystemSinkFactory {
    fn open(&self, config: &Config) -> Result<LogSinkSet, TelemetryError> {
        LogSinkSet::open(config)
    }

    fn install(&self, context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError> {
        install(context)
    }
}

/// Handle that keeps the subscriber's level ceiling in step with the sinks.
#[derive(Debug, Clone, Default)]
pub struct TelemetryHandle {
    ceiling: Option<reload::Handle<LevelFilter, Registry>>,
}

impl TelemetryHandle {
    /// Handle with no subscriber behind it.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Lets through exactly the levels some sink in `sinks` accepts.
    pub fn refresh(&self, sinks: &LogSinkSet) {
        let Some(ceiling) = &self.ceiling else {
            return;
        };
        let level = sinks.max_level();
        if let Err(error) = ceiling.modify(|filter| *filter = level) {
            warn!(
                target: TELEMETRY_TARGET,
                error = %error,
                "failed to update telemetry level ceiling"
            );
        }
    }
}

/// Installs the global subscriber when invoked for the first time.
///
/// Repeated calls return the handle from the first installation; the
/// subscriber keeps reading from the context it was installed with.
pub fn install(context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY
        .get_or_try_init(|| install_subscriber(context))
        .cloned()
}

fn install_subscriber(context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError> {
    let initial = context.current().sinks().max_level();
    let (ceiling, handle) = reload::Layer::new(initial);

    let subscriber = tracing_subscriber::registry()
        .with(ceiling)
        .with(
            fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_names(false)
                // Files and terminals share one formatter, so colour stays off.
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(SinkWriter::new(context.clone(), LogFormat::Compact)),
        )
        .with(
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(SinkWriter::new(context.clone(), LogFormat::Json)),
        );

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(TelemetryHandle {
        ceiling: Some(handle),
    })
}
