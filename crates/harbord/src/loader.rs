//! Configuration loading seam shared by startup and reload.

use harbor_config::{CliOverrides, Config, ConfigError, ConfigSource, Defaults, build};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Builds a fresh snapshot.
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Loader that rebuilds from the file with the startup CLI overrides.
///
/// Reloads re-read the same file and re-apply the same overrides, so a flag
/// given at startup keeps winning over later file edits.
#[derive(Debug, Clone)]
pub struct SystemConfigLoader {
    source: ConfigSource,
    overrides: CliOverrides,
    defaults: Defaults,
}

impl SystemConfigLoader {
    /// Creates a loader for `source` with the given overrides and defaults.
    #[must_use]
    pub fn new(source: ConfigSource, overrides: CliOverrides, defaults: Defaults) -> Self {
        Self {
            source,
            overrides,
            defaults,
        }
    }
}

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        build(&self.source, &self.overrides, &self.defaults)
    }
}
