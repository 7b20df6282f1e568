//! On-disk configuration schema.
//!
//! Every field is optional so the builder can tell "absent" apart from "set
//! to the zero value" before defaults are applied.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging::{LogFormat, LogLevel};
use crate::mode::RawMode;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub(crate) daemonize: Option<bool>,
    pub(crate) daemon: FileDaemon,
    pub(crate) servers: Vec<FileServer>,
    pub(crate) timeout: FileTimeout,
    pub(crate) period: FilePeriod,
    pub(crate) log: FileLog,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileDaemon {
    pub(crate) pidfile: Option<Utf8PathBuf>,
    pub(crate) pidfile_mode: Option<RawMode>,
    pub(crate) workdir: Option<Utf8PathBuf>,
    pub(crate) umask: Option<RawMode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ServerKind {
    #[default]
    Inet,
    Unix,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileServer {
    pub(crate) kind: ServerKind,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) addr: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileTimeout {
    #[serde(with = "humantime_serde")]
    pub(crate) workers_done: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FilePeriod {
    #[serde(with = "humantime_serde")]
    pub(crate) memstats: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileLog {
    pub(crate) dir: Option<Utf8PathBuf>,
    pub(crate) format: Option<LogFormat>,
    pub(crate) disable_console: Option<bool>,
    pub(crate) disable_file: Option<bool>,
    pub(crate) console_level: Option<LogLevel>,
    pub(crate) loggers: BTreeMap<String, FileLogger>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct FileLogger {
    pub(crate) file: Option<String>,
    pub(crate) level: Option<LogLevel>,
}

impl FileConfig {
    /// Decodes the file at `path`.
    ///
    /// A missing file yields an empty base unless the path was requested
    /// explicitly. Empty documents also decode to the empty base.
    pub(crate) fn read(path: &Utf8Path, explicit: bool) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    });
                }
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(path, &text)
    }

    pub(crate) fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_saphyr::from_str(text).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }
}
