//! Snapshot construction: decode, default, override, validate.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use humantime_serde::re::humantime::format_duration;

use crate::defaults::{DEFAULT_LOGGERS, Defaults, MAX_INTERVAL, QUIET_LEVEL};
use crate::error::ConfigError;
use crate::file::{FileConfig, FileLog, FileServer, ServerKind};
use crate::logging::{ConsoleSettings, LogSettings, LoggerSettings};
use crate::mode::RawMode;
use crate::overrides::{CliOverrides, ConfigSource, Verbosity};
use crate::socket::ServerEndpoint;
use crate::{Config, DaemonSettings, Periods, Timeouts};

/// Builds an immutable snapshot from the file, the defaults, and the CLI.
///
/// The steps run in a fixed order: the file is decoded (a missing default
/// file is tolerated), every unset field is filled from `defaults`, explicit
/// CLI overrides are applied, and cross-field constraints are checked. The
/// function has no side effects beyond reading `source.path`, so identical
/// inputs yield equal snapshots.
pub fn build(
    source: &ConfigSource,
    overrides: &CliOverrides,
    defaults: &Defaults,
) -> Result<Config, ConfigError> {
    let file = FileConfig::read(&source.path, source.explicit)?;
    let mut config = defaultize(file, defaults)?;
    apply_overrides(&mut config, overrides);
    validate(&config)?;
    Ok(config)
}

fn defaultize(file: FileConfig, defaults: &Defaults) -> Result<Config, ConfigError> {
    let FileConfig {
        daemonize,
        daemon,
        servers,
        timeout,
        period,
        log,
    } = file;

    let pidfile_mode = resolve_mode(daemon.pidfile_mode.as_ref(), "daemon.pidfile-mode")?
        .filter(|mode| *mode != 0)
        .unwrap_or(defaults.pidfile_mode);
    let umask = resolve_mode(daemon.umask.as_ref(), "daemon.umask")?.unwrap_or(0);

    let mut endpoints: Vec<ServerEndpoint> = servers
        .into_iter()
        .map(|server| server_endpoint(server, defaults))
        .collect();
    if endpoints.is_empty() {
        endpoints.push(ServerEndpoint::inet(
            defaults.inet_host.clone(),
            defaults.inet_port,
        ));
    }

    Ok(Config {
        daemonize: daemonize.unwrap_or(false),
        daemon: DaemonSettings {
            pidfile: defaults.resolve(
                daemon
                    .pidfile
                    .filter(|path| !path.as_str().is_empty())
                    .unwrap_or_else(|| defaults.pidfile.clone()),
            ),
            pidfile_mode,
            workdir: daemon
                .workdir
                .filter(|path| !path.as_str().is_empty())
                .map(|path| defaults.resolve(path)),
            umask,
        },
        servers: endpoints,
        timeout: Timeouts {
            workers_done: timeout
                .workers_done
                .filter(|duration| !duration.is_zero())
                .unwrap_or(defaults.workers_done),
        },
        period: Periods {
            memstats: period
                .memstats
                .filter(|duration| !duration.is_zero())
                .unwrap_or(defaults.memstats),
        },
        log: log_settings(log, defaults),
    })
}

fn resolve_mode(raw: Option<&RawMode>, field: &str) -> Result<Option<u32>, ConfigError> {
    raw.map(|mode| mode.resolve().map_err(|message| ConfigError::invalid(field, message)))
        .transpose()
}

fn server_endpoint(server: FileServer, defaults: &Defaults) -> ServerEndpoint {
    match server.kind {
        ServerKind::Inet => ServerEndpoint::inet(
            server
                .host
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| defaults.inet_host.clone()),
            server
                .port
                .filter(|port| *port != 0)
                .unwrap_or(defaults.inet_port),
        ),
        ServerKind::Unix => ServerEndpoint::unix(
            defaults.resolve(
                server
                    .addr
                    .filter(|addr| !addr.as_str().is_empty())
                    .unwrap_or_else(|| defaults.unix_addr.clone()),
            ),
        ),
    }
}

fn log_settings(log: FileLog, defaults: &Defaults) -> LogSettings {
    let mut loggers: BTreeMap<String, LoggerSettings> = log
        .loggers
        .into_iter()
        .map(|(name, logger)| {
            let settings = LoggerSettings {
                file: logger
                    .file
                    .filter(|file| !file.is_empty())
                    .unwrap_or_else(|| format!("{name}.log")),
                level: logger.level.unwrap_or(defaults.log_level),
            };
            (name, settings)
        })
        .collect();
    for name in DEFAULT_LOGGERS {
        loggers
            .entry(name.to_owned())
            .or_insert_with(|| LoggerSettings {
                file: format!("{name}.log"),
                level: defaults.log_level,
            });
    }

    LogSettings {
        dir: defaults.resolve(
            log.dir
                .filter(|dir| !dir.as_str().is_empty())
                .unwrap_or_else(|| defaults.log_dir.clone()),
        ),
        format: log.format.unwrap_or(defaults.log_format),
        console: ConsoleSettings {
            enabled: !log.disable_console.unwrap_or(false),
            level: log.console_level.unwrap_or(defaults.log_level),
        },
        file_enabled: !log.disable_file.unwrap_or(false),
        loggers,
    }
}

fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if overrides.foreground {
        config.daemonize = false;
    } else if overrides.daemonize {
        config.daemonize = true;
    }

    if let Some(workers_done) = overrides.workers_done {
        config.timeout.workers_done = workers_done;
    }

    if overrides.log_disable_console {
        config.log.console.enabled = false;
    }
    if overrides.log_disable_file {
        config.log.file_enabled = false;
    }
    if !config.log.console.enabled && !config.log.file_enabled {
        config.log.quiet(QUIET_LEVEL);
    }

    match overrides.verbosity {
        Verbosity::Normal => {}
        Verbosity::Debug => config.log.escalate(crate::LogLevel::Debug),
        Verbosity::Trace => config.log.escalate(crate::LogLevel::Trace),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.daemon.pidfile_mode > 0o7777 {
        return Err(ConfigError::invalid(
            "daemon.pidfile-mode",
            format!("{:o} exceeds 7777", config.daemon.pidfile_mode),
        ));
    }
    if config.daemon.umask > 0o777 {
        return Err(ConfigError::invalid(
            "daemon.umask",
            format!("{:o} exceeds 777", config.daemon.umask),
        ));
    }
    validate_interval("timeout.workers-done", config.timeout.workers_done)?;
    validate_interval("period.memstats", config.period.memstats)?;
    validate_servers(&config.servers)?;
    validate_loggers(&config.log)
}

fn validate_interval(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    if value > MAX_INTERVAL {
        return Err(ConfigError::invalid(
            field,
            format!(
                "{} exceeds the limit of {}",
                format_duration(value),
                format_duration(MAX_INTERVAL)
            ),
        ));
    }
    Ok(())
}

fn validate_servers(servers: &[ServerEndpoint]) -> Result<(), ConfigError> {
    if servers.is_empty() {
        return Err(ConfigError::invalid(
            "servers",
            "at least one listener is required",
        ));
    }
    let mut seen = HashSet::new();
    for (index, endpoint) in servers.iter().enumerate() {
        if !seen.insert(endpoint) {
            return Err(ConfigError::invalid(
                format!("servers[{index}]"),
                format!("duplicate listener {endpoint}"),
            ));
        }
        if let Some(path) = endpoint.unix_path()
            && path.parent().is_none_or(|parent| parent.as_str().is_empty())
        {
            return Err(ConfigError::invalid(
                format!("servers[{index}].addr"),
                format!("socket path '{path}' has no parent directory"),
            ));
        }
    }
    Ok(())
}

fn validate_loggers(log: &LogSettings) -> Result<(), ConfigError> {
    for (name, logger) in &log.loggers {
        let plain = !logger.file.is_empty()
            && !logger.file.contains(['/', '\\'])
            && logger.file != "."
            && logger.file != "..";
        if !plain {
            return Err(ConfigError::invalid(
                format!("log.loggers.{name}.file"),
                format!("'{}' is not a plain file name", logger.file),
            ));
        }
    }
    Ok(())
}
