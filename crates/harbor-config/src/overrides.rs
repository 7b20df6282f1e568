use std::time::Duration;

use camino::Utf8PathBuf;

use crate::defaults::DEFAULT_CONFIG_PATH;

/// Where the configuration file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    /// File to decode.
    pub path: Utf8PathBuf,
    /// Whether the operator asked for this path. Missing explicit files are
    /// errors; a missing default file is tolerated.
    pub explicit: bool,
}

impl ConfigSource {
    /// Source pointing at an operator-supplied path.
    #[must_use]
    pub fn explicit(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            explicit: true,
        }
    }

    /// Source pointing at the default location.
    #[must_use]
    pub fn implicit(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            explicit: false,
        }
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::implicit(DEFAULT_CONFIG_PATH)
    }
}

/// Requested verbosity escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Levels stay as configured.
    #[default]
    Normal,
    /// Every sink logs at least at `debug`.
    Debug,
    /// Every sink logs at `trace`.
    Trace,
}

/// Command-line values layered over the file and the defaults.
///
/// Flags are `true` only when the operator passed them; optional values are
/// `Some` only when supplied, so an explicit zero is still an override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--foreground`.
    pub foreground: bool,
    /// `--daemonize` or `--background`.
    pub daemonize: bool,
    /// `--timeout-workers-done`.
    pub workers_done: Option<Duration>,
    /// `--log-disable-console`.
    pub log_disable_console: bool,
    /// `--log-disable-file`.
    pub log_disable_file: bool,
    /// `--debug`/`--trace`.
    pub verbosity: Verbosity,
}
