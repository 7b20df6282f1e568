//! Implements the daemonisation backend for the `harbord` process.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicBool, Ordering};

use daemonize_me::Daemon;
use harbor_config::DaemonSettings;
use nix::sys::stat::{Mode, umask};
use tracing::{error, info};

use super::DAEMON_TARGET;
use super::errors::DaemonError;

static DETACHED: AtomicBool = AtomicBool::new(false);

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    ///
    /// Returns `true` in the process that should keep running. Must be
    /// called before any thread is spawned.
    fn daemonize(&self, settings: &DaemonSettings) -> Result<bool, DaemonError>;
}

/// Daemoniser that delegates to `daemonize-me`.
///
/// The library exits the parent with status 0 once the child is forked, so
/// only the child ever returns from [`Daemonizer::daemonize`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, settings: &DaemonSettings) -> Result<bool, DaemonError> {
        if DETACHED.swap(true, Ordering::SeqCst) {
            error!(
                target: DAEMON_TARGET,
                "daemonisation requested twice in one process"
            );
            return Err(DaemonError::AlreadyDetached);
        }
        info!(
            target: DAEMON_TARGET,
            workdir = settings.workdir.as_ref().map(|dir| dir.as_str()),
            umask = format_args!("{:03o}", settings.umask),
            "daemonising into background"
        );
        let mut daemon = Daemon::new();
        if let Some(workdir) = &settings.workdir {
            daemon = daemon.work_dir(workdir.as_std_path());
        }
        daemon = daemon.name(OsStr::new(env!("CARGO_PKG_NAME")));
        daemon.start()?;
        apply_umask(settings.umask);
        info!(
            target: DAEMON_TARGET,
            pid = std::process::id(),
            "daemon process detached; continuing in child"
        );
        Ok(true)
    }
}

fn apply_umask(bits: u32) {
    let mask = Mode::from_bits_truncate(bits as nix::libc::mode_t);
    umask(mask);
}
