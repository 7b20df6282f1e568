//! Human-readable rendering of a snapshot.
//!
//! The output uses the file schema, so a dumped snapshot can be saved and
//! loaded again as a configuration file.

use std::fmt::{self, Write as _};
use std::time::Duration;

use humantime_serde::re::humantime::format_duration;

use crate::mode::format_octal;
use crate::socket::ServerEndpoint;
use crate::Config;

impl Config {
    /// Renders every resolved field as an indented YAML document.
    #[must_use]
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        render(self, &mut out)?;
        f.write_str(&out)
    }
}

fn render(config: &Config, out: &mut String) -> fmt::Result {
    writeln!(out, "daemonize: {}", config.daemonize)?;

    writeln!(out, "daemon:")?;
    writeln!(out, "  pidfile: {}", quote(config.daemon.pidfile.as_str()))?;
    writeln!(
        out,
        "  pidfile-mode: {}",
        quote(&format_octal(config.daemon.pidfile_mode))
    )?;
    if let Some(workdir) = &config.daemon.workdir {
        writeln!(out, "  workdir: {}", quote(workdir.as_str()))?;
    }
    writeln!(out, "  umask: {}", quote(&format_octal(config.daemon.umask)))?;

    writeln!(out, "servers:")?;
    for server in &config.servers {
        match server {
            ServerEndpoint::Inet { host, port } => {
                writeln!(out, "  - kind: inet")?;
                writeln!(out, "    host: {}", quote(host))?;
                writeln!(out, "    port: {port}")?;
            }
            ServerEndpoint::Unix { path } => {
                writeln!(out, "  - kind: unix")?;
                writeln!(out, "    addr: {}", quote(path.as_str()))?;
            }
        }
    }

    writeln!(out, "timeout:")?;
    writeln!(
        out,
        "  workers-done: {}",
        duration(config.timeout.workers_done)
    )?;
    writeln!(out, "period:")?;
    writeln!(out, "  memstats: {}", duration(config.period.memstats))?;

    let log = &config.log;
    writeln!(out, "log:")?;
    writeln!(out, "  dir: {}", quote(log.dir.as_str()))?;
    writeln!(out, "  format: {}", log.format)?;
    writeln!(out, "  disable-console: {}", !log.console.enabled)?;
    writeln!(out, "  disable-file: {}", !log.file_enabled)?;
    writeln!(out, "  console-level: {}", log.console.level)?;
    writeln!(out, "  loggers:")?;
    for (name, logger) in &log.loggers {
        writeln!(out, "    {}:", quote(name))?;
        writeln!(out, "      file: {}", quote(&logger.file))?;
        writeln!(out, "      level: {}", logger.level)?;
    }
    Ok(())
}

fn duration(value: Duration) -> String {
    format_duration(value).to_string()
}

fn quote(text: &str) -> String {
    format!("{text:?}")
}
