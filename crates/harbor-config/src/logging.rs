use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
}

/// Severity threshold for a sink. Variants are ordered from quietest to most
/// verbose.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogLevel {
    /// Nothing is written.
    Off,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Operational messages.
    #[default]
    Info,
    /// Diagnostic detail.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Returns the more verbose of the two levels.
    #[must_use]
    pub fn at_least(self, floor: Self) -> Self {
        self.max(floor)
    }
}

/// Console sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    /// Whether events are written to stderr.
    pub enabled: bool,
    /// Threshold applied to console output.
    pub level: LogLevel,
}

/// Settings for one named logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerSettings {
    /// File name, relative to [`LogSettings::dir`].
    pub file: String,
    /// Threshold applied to the logger's file.
    pub level: LogLevel,
}

/// Resolved logging configuration carried by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Directory receiving per-logger files.
    pub dir: Utf8PathBuf,
    /// Line format shared by every sink.
    pub format: LogFormat,
    /// Console sink settings.
    pub console: ConsoleSettings,
    /// Whether per-logger files are written.
    pub file_enabled: bool,
    /// Named loggers, keyed by name.
    pub loggers: BTreeMap<String, LoggerSettings>,
}

impl LogSettings {
    /// Forces console output back on at the quiet level.
    pub(crate) fn quiet(&mut self, level: LogLevel) {
        self.console.enabled = true;
        self.console.level = level;
    }

    /// Raises the console and every logger to at least `floor`.
    pub(crate) fn escalate(&mut self, floor: LogLevel) {
        self.console.level = self.console.level.at_least(floor);
        for logger in self.loggers.values_mut() {
            logger.level = logger.level.at_least(floor);
        }
    }

    /// Path of the file backing `logger`.
    #[must_use]
    pub fn file_path(&self, logger: &LoggerSettings) -> Utf8PathBuf {
        self.dir.join(&logger.file)
    }
}
