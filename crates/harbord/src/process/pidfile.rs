use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use super::DAEMON_TARGET;
use super::errors::DaemonError;

/// Owns the pidfile of a detached process and removes it exactly once.
#[derive(Debug)]
pub struct PidfileGuard {
    path: Utf8PathBuf,
    pid: u32,
    released: bool,
}

impl PidfileGuard {
    /// Refuses to continue when `path` names a live process.
    ///
    /// Stale pidfiles are removed. Runs before forking so the operator sees
    /// the error on the terminal.
    pub fn ensure_vacant(path: &Utf8Path) -> Result<(), DaemonError> {
        let Some(pid) = read_pid(path) else {
            return remove_file(path);
        };
        if check_process(pid)? {
            info!(
                target: DAEMON_TARGET,
                pid,
                file = %path,
                "refusing to start: existing daemon alive"
            );
            return Err(DaemonError::PidfileBusy {
                path: path.to_path_buf(),
                pid,
            });
        }
        warn!(
            target: DAEMON_TARGET,
            pid,
            file = %path,
            "existing daemon not detected; removing stale pidfile"
        );
        remove_file(path)
    }

    /// Records the current process in `path` with permission bits `mode`.
    pub fn write(path: &Utf8Path, mode: u32) -> Result<Self, DaemonError> {
        let io_error = |source: io::Error| DaemonError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let pid = std::process::id();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .map_err(io_error)?;
        writeln!(file, "{pid}").map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        // The open mode is filtered by the umask; the configured bits win.
        fs::set_permissions(path, Permissions::from_mode(mode)).map_err(io_error)?;
        info!(
            target: DAEMON_TARGET,
            pid,
            file = %path,
            mode = format_args!("{mode:04o}"),
            "pidfile written"
        );
        Ok(Self {
            path: path.to_path_buf(),
            pid,
            released: false,
        })
    }

    /// Pidfile location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Removes the pidfile. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // Only remove a file that still names us; a successor may own it.
        if read_pid(&self.path) != Some(self.pid) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => info!(target: DAEMON_TARGET, file = %self.path, "pidfile removed"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: DAEMON_TARGET,
                file = %self.path,
                error = %error,
                "failed to remove pidfile"
            ),
        }
    }
}

impl Drop for PidfileGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(path: &Utf8Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

fn remove_file(path: &Utf8Path) -> Result<(), DaemonError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DaemonError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn check_process(pid: u32) -> Result<bool, DaemonError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(DaemonError::CheckProcess { pid, source }),
    }
}
