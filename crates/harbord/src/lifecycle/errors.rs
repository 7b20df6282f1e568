//! Errors that stop `harbord` before or while starting.

use std::io;

use harbor_config::ConfigError;
use thiserror::Error;

use crate::process::DaemonError;
use crate::signals::SignalError;
use crate::supervisor::WorkerError;
use crate::telemetry::TelemetryError;
use crate::transport::ListenerError;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The initial configuration could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Log sinks or the subscriber could not be set up.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// Detaching or writing the pidfile failed.
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    /// A listener could not be bound.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Signals(#[from] SignalError),
    /// A worker thread could not be started.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// Writing to standard output failed.
    #[error("failed to write output: {source}")]
    Output {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
