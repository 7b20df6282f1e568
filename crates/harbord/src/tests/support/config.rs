//! Temporary configuration files for tests.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use harbor_config::{CliOverrides, Config, ConfigSource, Defaults, build};
use tempfile::TempDir;

use crate::context::RuntimeContext;
use crate::loader::SystemConfigLoader;
use crate::telemetry::LogSinkSet;

/// Default snapshot with every sink disabled.
pub(crate) fn quiet_config() -> Config {
    let mut config = build(
        &ConfigSource::implicit("/nonexistent/harbord.yml"),
        &CliOverrides::default(),
        &Defaults::default(),
    )
    .expect("default config");
    config.log.console.enabled = false;
    config.log.file_enabled = false;
    config
}

/// Context holding [`quiet_config`] and an empty sink set.
pub(crate) fn quiet_context() -> RuntimeContext {
    let config = quiet_config();
    let sinks = LogSinkSet::open(&config).expect("open quiet sinks");
    RuntimeContext::new(Arc::new(config), Arc::new(sinks))
}

/// A `harbord.yml` in a temporary directory whose logs stay inside it.
pub(crate) struct ConfigFixture {
    dir: TempDir,
}

impl ConfigFixture {
    pub(crate) fn new() -> Self {
        let fixture = Self {
            dir: TempDir::new().expect("temp dir"),
        };
        fixture.write("");
        fixture
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        Utf8Path::from_path(self.dir.path()).expect("utf8 temp dir")
    }

    pub(crate) fn path(&self) -> Utf8PathBuf {
        self.root().join("harbord.yml")
    }

    pub(crate) fn log_dir(&self) -> Utf8PathBuf {
        self.root().join("logs")
    }

    /// Writes the logging section followed by `body`.
    pub(crate) fn write(&self, body: &str) {
        let text = format!(
            "log:\n  dir: {}\n  disable-console: true\n{body}",
            self.log_dir()
        );
        self.write_raw(&text);
    }

    /// Writes `text` verbatim.
    pub(crate) fn write_raw(&self, text: &str) {
        fs::write(self.path(), text).expect("write config");
    }

    pub(crate) fn loader(&self) -> SystemConfigLoader {
        SystemConfigLoader::new(
            ConfigSource::explicit(self.path()),
            CliOverrides::default(),
            Defaults::default(),
        )
    }

    pub(crate) fn context(&self) -> RuntimeContext {
        use crate::loader::ConfigLoader;

        let config = self.loader().load().expect("fixture config");
        let sinks = LogSinkSet::open(&config).expect("fixture sinks");
        RuntimeContext::new(Arc::new(config), Arc::new(sinks))
    }
}
