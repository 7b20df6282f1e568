//! Process-wide holder of the active configuration and log sinks.
//!
//! The pair lives in a single [`Generation`] behind an [`ArcSwap`], so a
//! reader either sees the old pair or the new one and never a mix. Retired
//! generations are handed back to the writer for disposal.

use std::sync::Arc;

use arc_swap::ArcSwap;
use harbor_config::Config;

use crate::telemetry::LogSinkSet;

/// One installed (configuration, sink set) pair.
#[derive(Debug)]
pub struct Generation {
    number: u64,
    config: Arc<Config>,
    sinks: Arc<LogSinkSet>,
}

impl Generation {
    /// Monotonic counter, starting at zero for the initial pair.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Configuration snapshot of this generation.
    #[must_use]
    pub const fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Log sinks of this generation.
    #[must_use]
    pub const fn sinks(&self) -> &Arc<LogSinkSet> {
        &self.sinks
    }
}

/// Cloneable handle to the shared generation cell.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    cell: Arc<ArcSwap<Generation>>,
}

impl RuntimeContext {
    /// Creates the context with its initial pair.
    #[must_use]
    pub fn new(config: Arc<Config>, sinks: Arc<LogSinkSet>) -> Self {
        let initial = Generation {
            number: 0,
            config,
            sinks,
        };
        Self {
            cell: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Returns the active pair without blocking writers.
    #[must_use]
    pub fn current(&self) -> Arc<Generation> {
        self.cell.load_full()
    }

    /// Installs a new pair and returns the one it replaced.
    pub fn replace(&self, config: Arc<Config>, sinks: Arc<LogSinkSet>) -> Arc<Generation> {
        self.cell.rcu(|current| Generation {
            number: current.number + 1,
            config: Arc::clone(&config),
            sinks: Arc::clone(&sinks),
        })
    }

    /// Installs new sinks next to the active configuration.
    pub fn replace_sinks(&self, sinks: Arc<LogSinkSet>) -> Arc<Generation> {
        self.cell.rcu(|current| Generation {
            number: current.number + 1,
            config: Arc::clone(&current.config),
            sinks: Arc::clone(&sinks),
        })
    }
}
