use std::time::Duration;

use camino::Utf8PathBuf;

use crate::logging::{LogFormat, LogLevel};

/// Configuration file consulted when `--config` is not supplied.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/harbor/harbord.yml";

/// Pidfile written when the daemon detaches.
pub const DEFAULT_PIDFILE: &str = "/run/harbor/harbord.pid";

/// Permission bits applied to the pidfile.
pub const DEFAULT_PIDFILE_MODE: u32 = 0o644;

/// Directory receiving per-logger files.
pub const DEFAULT_LOG_DIR: &str = "/var/log/harbor";

/// Host used by inet listeners that omit one.
pub const DEFAULT_INET_HOST: &str = "0.0.0.0";

/// Port used by inet listeners that omit one.
pub const DEFAULT_INET_PORT: u16 = 8000;

/// Socket path used by unix listeners that omit one.
pub const DEFAULT_UNIX_ADDR: &str = "/run/harbor/harbord.sock";

/// Grace period granted to workers during shutdown.
pub const DEFAULT_WORKERS_DONE: Duration = Duration::from_secs(5);

/// Interval between memory statistics reports.
pub const DEFAULT_MEMSTATS_PERIOD: Duration = Duration::from_secs(60);

/// Longest accepted grace period or task interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Logger names that always exist after defaulting.
pub const DEFAULT_LOGGERS: [&str; 3] = ["app", "http", "memstats"];

/// Console level forced when every other sink is disabled.
pub const QUIET_LEVEL: LogLevel = LogLevel::Error;

/// Values used to fill every field the configuration file leaves unset.
///
/// The builder never reads constants directly so tests can supply their own
/// defaults without touching the filesystem locations above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Pidfile path.
    pub pidfile: Utf8PathBuf,
    /// Pidfile permission bits.
    pub pidfile_mode: u32,
    /// Host for inet listeners.
    pub inet_host: String,
    /// Port for inet listeners.
    pub inet_port: u16,
    /// Path for unix listeners.
    pub unix_addr: Utf8PathBuf,
    /// Shutdown grace period.
    pub workers_done: Duration,
    /// Memory statistics period.
    pub memstats: Duration,
    /// Log directory.
    pub log_dir: Utf8PathBuf,
    /// Log line format.
    pub log_format: LogFormat,
    /// Level applied to the console and to ensured loggers.
    pub log_level: LogLevel,
    /// Directory that relative paths in the file are resolved against.
    /// `None` leaves them relative.
    pub base_dir: Option<Utf8PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            pidfile: Utf8PathBuf::from(DEFAULT_PIDFILE),
            pidfile_mode: DEFAULT_PIDFILE_MODE,
            inet_host: DEFAULT_INET_HOST.to_owned(),
            inet_port: DEFAULT_INET_PORT,
            unix_addr: Utf8PathBuf::from(DEFAULT_UNIX_ADDR),
            workers_done: DEFAULT_WORKERS_DONE,
            memstats: DEFAULT_MEMSTATS_PERIOD,
            log_dir: Utf8PathBuf::from(DEFAULT_LOG_DIR),
            log_format: LogFormat::default(),
            log_level: LogLevel::Info,
            base_dir: None,
        }
    }
}

impl Defaults {
    /// Resolves `path` against [`Defaults::base_dir`] when it is relative.
    #[must_use]
    pub fn resolve(&self, path: Utf8PathBuf) -> Utf8PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}
