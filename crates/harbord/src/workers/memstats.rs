//! Periodic memory statistics reporter.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::supervisor::{StopToken, Worker, WorkerError};

const MEMSTATS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::memstats");
const PROC_STATUS: &str = "/proc/self/status";

/// Memory figures of this process, in kibibytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    /// Resident set size.
    pub rss_kib: u64,
    /// Peak resident set size.
    pub peak_rss_kib: u64,
    /// Virtual memory size.
    pub virtual_kib: u64,
    /// Thread count.
    pub threads: u64,
}

impl MemorySample {
    /// Parses the `key: value` lines of a proc status file.
    ///
    /// Returns `None` unless the resident set size is present.
    #[must_use]
    pub fn parse(status: &str) -> Option<Self> {
        let mut sample = Self::default();
        let mut seen_rss = false;
        for line in status.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let Some(number) = value
                .split_whitespace()
                .next()
                .and_then(|field| field.parse::<u64>().ok())
            else {
                continue;
            };
            match key {
                "VmRSS" => {
                    sample.rss_kib = number;
                    seen_rss = true;
                }
                "VmHWM" => sample.peak_rss_kib = number,
                "VmSize" => sample.virtual_kib = number,
                "Threads" => sample.threads = number,
                _ => {}
            }
        }
        seen_rss.then_some(sample)
    }

    fn read(path: &Utf8Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("no VmRSS line in {path}"))
        })
    }
}

/// Logs a [`MemorySample`] every `period.memstats`.
///
/// The period is read from the active snapshot before each sleep, so a
/// reload takes effect after the current interval.
#[derive(Debug)]
pub struct MemstatsWorker {
    source: Utf8PathBuf,
}

impl MemstatsWorker {
    /// Reporter reading this process's proc status file.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(PROC_STATUS)
    }

    /// Reporter reading `source` instead of the proc status file.
    #[must_use]
    pub fn with_source(source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    fn report(&self, context: &RuntimeContext) {
        match MemorySample::read(&self.source) {
            Ok(sample) => info!(
                target: MEMSTATS_TARGET,
                rss_kib = sample.rss_kib,
                peak_rss_kib = sample.peak_rss_kib,
                virtual_kib = sample.virtual_kib,
                threads = sample.threads,
                generation = context.current().number(),
                "memory statistics"
            ),
            Err(error) => warn!(
                target: MEMSTATS_TARGET,
                source = %self.source,
                error = %error,
                "failed to sample memory statistics"
            ),
        }
    }
}

impl Default for MemstatsWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for MemstatsWorker {
    fn name(&self) -> &str {
        "memstats"
    }

    fn run(self: Box<Self>, context: RuntimeContext, stop: StopToken) -> Result<(), WorkerError> {
        loop {
            let period = context.current().config().period.memstats;
            if stop.wait_timeout(period) {
                return Ok(());
            }
            self.report(&context);
        }
    }
}
