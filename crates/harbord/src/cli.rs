//! Command-line interface of the `harbord` binary.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use harbor_config::{CliOverrides, ConfigSource, DEFAULT_CONFIG_PATH, Defaults, Verbosity};
use humantime_serde::re::humantime::parse_duration;

/// Process lifecycle controller for the harbor server.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "harbord",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Flags shared by every action.
    #[command(flatten)]
    pub flags: Flags,
    /// Action to perform; runs the server when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Flags accepted before or after the subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    /// Configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<Utf8PathBuf>,
    /// Prints the effective configuration and exits.
    #[arg(long, global = true)]
    pub print_config: bool,
    /// Stays attached to the terminal, even if the file asks to daemonize.
    #[arg(long, global = true)]
    pub foreground: bool,
    /// Detaches from the terminal.
    #[arg(long, visible_alias = "background", global = true)]
    pub daemonize: bool,
    /// Grace period granted to workers on shutdown, e.g. `10s`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, global = true)]
    pub timeout_workers_done: Option<Duration>,
    /// Disables the console log sink.
    #[arg(long, global = true)]
    pub log_disable_console: bool,
    /// Disables the file log sinks.
    #[arg(long, global = true)]
    pub log_disable_file: bool,
    /// Raises every sink to at least `debug`.
    #[arg(long, visible_alias = "vv", global = true)]
    pub debug: bool,
    /// Raises every sink to `trace`.
    #[arg(long, visible_alias = "vvv", global = true)]
    pub trace: bool,
}

/// Actions other than running the server.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Prints the effective configuration and exits.
    #[command(visible_alias = "config")]
    PrintConfig,
    /// Prints the version banner and exits.
    Version,
}

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the server and run until shutdown.
    Run,
    /// Render the effective configuration.
    PrintConfig,
    /// Print the version banner.
    Version,
}

impl Cli {
    /// Resolves the action; `--print-config` turns a run into a dump.
    #[must_use]
    pub fn action(&self) -> Action {
        match self.command {
            Some(Command::Version) => Action::Version,
            Some(Command::PrintConfig) => Action::PrintConfig,
            None if self.flags.print_config => Action::PrintConfig,
            None => Action::Run,
        }
    }
}

impl Flags {
    /// Configuration source: `--config` when given, else the default path.
    ///
    /// Relative paths are anchored at `cwd` so a reload after the process
    /// changed directory still reads the same file.
    #[must_use]
    pub fn source(&self, cwd: Option<&Utf8PathBuf>) -> ConfigSource {
        match &self.config {
            Some(path) if path.is_relative() => match cwd {
                Some(cwd) => ConfigSource::explicit(cwd.join(path)),
                None => ConfigSource::explicit(path.clone()),
            },
            Some(path) => ConfigSource::explicit(path.clone()),
            None => ConfigSource::implicit(DEFAULT_CONFIG_PATH),
        }
    }

    /// Values layered over the file and the defaults.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let verbosity = if self.trace {
            Verbosity::Trace
        } else if self.debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        };
        CliOverrides {
            foreground: self.foreground,
            daemonize: self.daemonize,
            workers_done: self.timeout_workers_done,
            log_disable_console: self.log_disable_console,
            log_disable_file: self.log_disable_file,
            verbosity,
        }
    }

    /// Built-in defaults with relative paths anchored at `cwd`.
    #[must_use]
    pub fn defaults(cwd: Option<Utf8PathBuf>) -> Defaults {
        Defaults {
            base_dir: cwd,
            ..Defaults::default()
        }
    }
}
