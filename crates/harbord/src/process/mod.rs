//! Detaching from the terminal and owning the pidfile.

mod daemonizer;
mod errors;
mod pidfile;

pub use daemonizer::{Daemonizer, SystemDaemonizer};
pub use errors::DaemonError;
pub use pidfile::PidfileGuard;

pub(crate) const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");
