//! Errors raised while detaching and managing the pidfile.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the daemonizer and the pidfile guard.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The pidfile names a process that is still alive.
    #[error("pidfile '{path}' belongs to running process {pid}")]
    PidfileBusy {
        /// Pidfile path.
        path: Utf8PathBuf,
        /// Live process recorded in the file.
        pid: u32,
    },
    /// Reading, writing or removing a runtime file failed.
    #[error("failed to update '{path}': {source}")]
    Io {
        /// Affected path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing a recorded pid failed for a reason other than absence.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// Pid found in the file.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// System-level daemonisation failed.
    #[error("failed to daemonise: {0}")]
    System(#[from] daemonize_me::DaemonError),
    /// The process already detached once.
    #[error("process is already detached")]
    AlreadyDetached,
}
