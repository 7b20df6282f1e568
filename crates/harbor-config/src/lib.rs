//! Configuration snapshots for the harbor server.
//!
//! A snapshot is produced by [`build`] from three layers applied in a fixed
//! order: the YAML file, built-in [`Defaults`], and [`CliOverrides`]. The
//! result is validated and never mutated afterwards; the daemon shares it as
//! `Arc<Config>` and replaces it wholesale on reload.

use std::time::Duration;

use camino::Utf8PathBuf;

mod builder;
mod defaults;
mod dump;
mod error;
mod file;
mod logging;
mod mode;
mod overrides;
mod socket;

pub use builder::build;
pub use defaults::{
    DEFAULT_CONFIG_PATH, DEFAULT_INET_HOST, DEFAULT_INET_PORT, DEFAULT_LOG_DIR, DEFAULT_LOGGERS,
    DEFAULT_MEMSTATS_PERIOD, DEFAULT_PIDFILE, DEFAULT_PIDFILE_MODE, DEFAULT_UNIX_ADDR,
    DEFAULT_WORKERS_DONE, Defaults, MAX_INTERVAL, QUIET_LEVEL,
};
pub use error::ConfigError;
pub use logging::{ConsoleSettings, LogFormat, LogLevel, LogSettings, LoggerSettings};
pub use overrides::{CliOverrides, ConfigSource, Verbosity};
pub use socket::{ServerEndpoint, SocketPreparationError};

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether the process detaches from its terminal on start.
    pub daemonize: bool,
    /// Settings applied while detaching.
    pub daemon: DaemonSettings,
    /// Listener endpoints, one worker each.
    pub servers: Vec<ServerEndpoint>,
    /// Shutdown timeouts.
    pub timeout: Timeouts,
    /// Periodic task intervals.
    pub period: Periods,
    /// Log sink configuration.
    pub log: LogSettings,
}

impl Config {
    /// Grace period granted to workers once shutdown begins.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.timeout.workers_done
    }
}

/// Settings used by the daemonizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    /// Pidfile path.
    pub pidfile: Utf8PathBuf,
    /// Pidfile permission bits.
    pub pidfile_mode: u32,
    /// Working directory after detaching; `None` keeps the current one.
    pub workdir: Option<Utf8PathBuf>,
    /// File creation mask after detaching.
    pub umask: u32,
}

/// Shutdown timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time workers get to stop before the process exits anyway.
    pub workers_done: Duration,
}

/// Periodic task intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periods {
    /// Interval between memory statistics reports.
    pub memstats: Duration,
}
