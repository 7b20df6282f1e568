//! Process lifecycle controller for the harbor server.
//!
//! `harbord` builds an immutable configuration snapshot, opens the log sinks
//! it describes, optionally detaches from the terminal and then supervises a
//! set of workers: one listener per configured endpoint plus a periodic
//! memory reporter.
//!
//! The running process reacts to three kinds of control events:
//!
//! - `SIGHUP` reloads the configuration file and reopens every log sink.
//!   Workers observe the new [`context::Generation`] on their next access;
//!   a configuration that fails to load leaves the current one active.
//! - `SIGUSR1` reopens the log sinks without rereading the file, which is
//!   what external log rotation expects.
//! - `SIGINT`, `SIGTERM` and `SIGQUIT` stop every worker within the
//!   configured grace period and remove the pidfile.
//!
//! Events are handled one at a time by the [`signals::SignalDispatcher`], so
//! generation numbers grow by exactly one per applied change.

pub mod cli;
pub mod context;
mod lifecycle;
pub mod loader;
pub mod process;
pub mod signals;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod workers;

pub use lifecycle::{
    LaunchError, LaunchPlan, ProcessControl, RunOutcome, ServiceDeps, print_config, run,
    run_with, write_version,
};

#[cfg(test)]
mod tests;
