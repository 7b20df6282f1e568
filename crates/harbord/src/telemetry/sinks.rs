//! Open log destinations for one configuration generation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use harbor_config::{Config, LogFormat, LogLevel};
use tracing::level_filters::LevelFilter;
use tracing::{Level, warn};

use super::{TARGET_PREFIX, TELEMETRY_TARGET, TelemetryError};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Converts a configured level into a `tracing` filter.
pub(crate) fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

#[derive(Debug)]
struct FileSink {
    name: String,
    path: Utf8PathBuf,
    level: LevelFilter,
    file: Mutex<File>,
}

/// Console stream plus one file per named logger.
///
/// A set is shared as `Arc<LogSinkSet>`; writers clone the `Arc` for the
/// duration of one event, so [`LogSinkSet::close`] can tell when the last
/// in-flight write has finished.
#[derive(Debug)]
pub struct LogSinkSet {
    format: LogFormat,
    console: Option<LevelFilter>,
    files: Vec<FileSink>,
    closed: AtomicBool,
    #[cfg(test)]
    tag: Option<u64>,
}

impl LogSinkSet {
    /// Opens every sink the snapshot enables.
    ///
    /// The log directory is created when file output is enabled; files are
    /// opened for appending so rotation tools can move them away first.
    pub fn open(config: &Config) -> Result<Self, TelemetryError> {
        let log = &config.log;
        let console = log
            .console
            .enabled
            .then(|| level_filter(log.console.level));

        let mut files = Vec::new();
        if log.file_enabled {
            fs::create_dir_all(log.dir.as_std_path()).map_err(|source| {
                TelemetryError::CreateDir {
                    path: log.dir.clone(),
                    source,
                }
            })?;
            for (name, logger) in &log.loggers {
                let path = log.file_path(logger);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path.as_std_path())
                    .map_err(|source| TelemetryError::OpenFile {
                        path: path.clone(),
                        source,
                    })?;
                files.push(FileSink {
                    name: name.clone(),
                    path,
                    level: level_filter(logger.level),
                    file: Mutex::new(file),
                });
            }
        }

        Ok(Self {
            format: log.format,
            console,
            files,
            closed: AtomicBool::new(false),
            #[cfg(test)]
            tag: None,
        })
    }

    /// Line format shared by every sink in the set.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }

    /// Paths of the open log files.
    pub fn file_paths(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.files.iter().map(|sink| &sink.path)
    }

    /// Whether [`LogSinkSet::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Most verbose level any sink accepts.
    #[must_use]
    pub fn max_level(&self) -> LevelFilter {
        self.files
            .iter()
            .map(|sink| sink.level)
            .chain(self.console)
            .max()
            .unwrap_or(LevelFilter::OFF)
    }

    /// Decides which sinks receive an event.
    pub(crate) fn route(&self, target: &str, level: &Level) -> Route {
        let console = self.console.is_some_and(|filter| *level <= filter);
        let file = self
            .logger_index(target)
            .filter(|index| self.files.get(*index).is_some_and(|sink| *level <= sink.level));
        Route { console, file }
    }

    fn logger_index(&self, target: &str) -> Option<usize> {
        let named = target
            .strip_prefix(TARGET_PREFIX)
            .and_then(|rest| rest.split("::").next())
            .and_then(|name| self.files.iter().position(|sink| sink.name == name));
        named.or_else(|| self.files.iter().position(|sink| sink.name == "app"))
    }

    /// Writes one formatted event to the routed sinks.
    pub(crate) fn write(&self, route: &Route, buf: &[u8]) -> io::Result<()> {
        if route.console {
            io::stderr().lock().write_all(buf)?;
        }
        if let Some(sink) = route.file.and_then(|index| self.files.get(index)) {
            let mut file = sink.file.lock().unwrap_or_else(PoisonError::into_inner);
            file.write_all(buf)?;
        }
        Ok(())
    }

    fn flush(&self) {
        for sink in &self.files {
            let result = {
                let mut file = sink.file.lock().unwrap_or_else(PoisonError::into_inner);
                file.flush().and_then(|()| file.sync_data())
            };
            if let Err(error) = result {
                warn!(
                    target: TELEMETRY_TARGET,
                    path = %sink.path,
                    error = %error,
                    "failed to flush log file"
                );
            }
        }
    }

    /// Closes the set once no other holder is writing through it.
    ///
    /// Waits up to `drain` for every other `Arc` to be dropped, then flushes.
    /// Returns `false` when the drain timed out; the files are then released
    /// by whichever holder drops the set last.
    pub fn close(self: Arc<Self>, drain: Duration) -> bool {
        let deadline = Instant::now().checked_add(drain);
        let mut drained = Arc::strong_count(&self) == 1;
        while !drained && deadline.is_none_or(|deadline| Instant::now() < deadline) {
            thread::sleep(DRAIN_POLL);
            drained = Arc::strong_count(&self) == 1;
        }
        self.flush();
        self.closed.store(true, Ordering::SeqCst);
        drained
    }
}

/// Sinks selected for a single event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Route {
    pub(crate) console: bool,
    pub(crate) file: Option<usize>,
}

impl Route {
    pub(crate) const fn is_empty(&self) -> bool {
        !self.console && self.file.is_none()
    }
}

#[cfg(test)]
impl LogSinkSet {
    pub(crate) fn empty() -> Self {
        Self {
            format: LogFormat::Compact,
            console: None,
            files: Vec::new(),
            closed: AtomicBool::new(false),
            tag: None,
        }
    }

    pub(crate) fn tagged(tag: u64) -> Self {
        Self {
            tag: Some(tag),
            ..Self::empty()
        }
    }

    pub(crate) fn tag(&self) -> Option<u64> {
        self.tag
    }
}
