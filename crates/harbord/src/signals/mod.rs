//! Turns operating-system signals into control events.
//!
//! A forwarder thread owns the `signal-hook` iterator and feeds a channel;
//! the [`SignalDispatcher`] consumes that channel on the main thread, one
//! event at a time.

mod dispatcher;
#[cfg(test)]
mod dispatcher_tests;

use std::io;
use std::sync::mpsc::Sender;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::dispatcher::{DispatcherState, ReconfigError, ShutdownCause, SignalDispatcher};

pub(crate) const SIGNALS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signals");

/// Input of the signal dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop every worker and exit.
    Shutdown {
        /// Signal number that requested the shutdown.
        signal: i32,
    },
    /// Reopen the log sinks.
    Rotate,
    /// Rebuild the configuration and reopen the log sinks.
    Reload,
    /// A worker returned before shutdown was requested.
    WorkerExited {
        /// Worker name.
        name: String,
        /// Failure message, if the worker failed.
        error: Option<String>,
    },
}

impl ControlEvent {
    /// Maps a received signal to its event.
    #[must_use]
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGINT | SIGTERM | SIGQUIT => Some(Self::Shutdown { signal }),
            SIGUSR1 => Some(Self::Rotate),
            SIGHUP => Some(Self::Reload),
            _ => None,
        }
    }
}

/// Errors raised while installing signal handlers.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Registering the handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The forwarder thread could not be spawned.
    #[error("failed to spawn signal forwarder: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Producer of control events for the dispatcher.
pub trait EventSource {
    /// Keeps event production alive; dropping it detaches the source.
    type Guard;

    /// Starts delivering events into `events`.
    fn attach(&self, events: Sender<ControlEvent>) -> Result<Self::Guard, SignalError>;
}

/// Event source backed by process signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl EventSource for SystemSignals {
    type Guard = SignalForwarder;

    fn attach(&self, events: Sender<ControlEvent>) -> Result<SignalForwarder, SignalError> {
        SignalForwarder::spawn(events)
    }
}

/// Thread forwarding process signals into the control channel.
pub struct SignalForwarder {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalForwarder {
    fn spawn(events: Sender<ControlEvent>) -> Result<Self, SignalError> {
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGUSR1, SIGHUP])
            .map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    let Some(event) = ControlEvent::from_signal(signal) else {
                        continue;
                    };
                    info!(target: SIGNALS_TARGET, signal, event = ?event, "signal received");
                    if events.send(event).is_err() {
                        debug!(target: SIGNALS_TARGET, "dispatcher gone; forwarder exiting");
                        break;
                    }
                }
            })
            .map_err(|source| SignalError::Spawn { source })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: SIGNALS_TARGET, "signal forwarder panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SIGINT, Some(ControlEvent::Shutdown { signal: SIGINT }))]
    #[case(SIGTERM, Some(ControlEvent::Shutdown { signal: SIGTERM }))]
    #[case(SIGQUIT, Some(ControlEvent::Shutdown { signal: SIGQUIT }))]
    #[case(SIGUSR1, Some(ControlEvent::Rotate))]
    #[case(SIGHUP, Some(ControlEvent::Reload))]
    #[case(signal_hook::consts::signal::SIGUSR2, None)]
    fn signals_map_to_events(#[case] signal: i32, #[case] expected: Option<ControlEvent>) {
        assert_eq!(ControlEvent::from_signal(signal), expected);
    }
}
