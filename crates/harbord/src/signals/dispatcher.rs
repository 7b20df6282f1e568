//! Single control loop that serializes shutdown, rotation and reload.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use harbor_config::{Config, ConfigError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{ControlEvent, SIGNALS_TARGET};
use crate::context::{Generation, RuntimeContext};
use crate::loader::ConfigLoader;
use crate::process::PidfileGuard;
use crate::supervisor::StopToken;
use crate::telemetry::{SinkFactory, TelemetryError, TelemetryHandle};

const DEFAULT_DRAIN: Duration = Duration::from_secs(1);

/// Lifecycle of the dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Created; workers not started yet.
    Idle,
    /// Waiting for the next event.
    Listening,
    /// Stopping workers.
    ShuttingDown,
    /// Reopening log sinks.
    Rotating,
    /// Rebuilding configuration and log sinks.
    Reloading,
    /// Shutdown finished; the loop has exited.
    Terminated,
}

/// Failures of rotation or reload. The previous pair stays installed.
#[derive(Debug, Error)]
pub enum ReconfigError {
    /// The configuration could not be rebuilt.
    #[error("failed to rebuild configuration: {0}")]
    Config(#[from] ConfigError),
    /// The log sinks could not be reopened.
    #[error("failed to reopen log sinks: {0}")]
    Sinks(#[from] TelemetryError),
}

/// Why the dispatcher stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A shutdown signal arrived.
    Signal(i32),
    /// A worker failed before shutdown was requested.
    WorkerFailed {
        /// Worker name.
        name: String,
        /// Failure message.
        error: String,
    },
    /// Every event sender went away.
    Disconnected,
}

/// Consumes control events and applies them to the runtime context.
pub struct SignalDispatcher<L, F> {
    context: RuntimeContext,
    loader: L,
    sinks: F,
    telemetry: TelemetryHandle,
    pidfile: Option<PidfileGuard>,
    drain: Duration,
    state: DispatcherState,
}

impl<L, F> SignalDispatcher<L, F>
where
    L: ConfigLoader,
    F: SinkFactory,
{
    /// Creates an idle dispatcher.
    pub fn new(context: RuntimeContext, loader: L, sinks: F, telemetry: TelemetryHandle) -> Self {
        Self {
            context,
            loader,
            sinks,
            telemetry,
            pidfile: None,
            drain: DEFAULT_DRAIN,
            state: DispatcherState::Idle,
        }
    }

    /// Hands the pidfile over so shutdown can release it.
    #[must_use]
    pub fn with_pidfile(mut self, pidfile: Option<PidfileGuard>) -> Self {
        self.pidfile = pidfile;
        self
    }

    /// Bounds how long retired sinks wait for in-flight writes.
    #[must_use]
    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DispatcherState {
        self.state
    }

    /// Marks the workers as started.
    pub fn listen(&mut self) {
        if self.state == DispatcherState::Idle {
            self.state = DispatcherState::Listening;
        }
    }

    /// Handles events until shutdown.
    pub fn run(&mut self, events: &Receiver<ControlEvent>, stop: &StopToken) -> ShutdownCause {
        self.listen();
        info!(target: SIGNALS_TARGET, "dispatcher listening for control events");
        loop {
            let cause = match events.recv() {
                Ok(event) => self.handle(event, stop),
                Err(_) => {
                    warn!(target: SIGNALS_TARGET, "control channel closed; shutting down");
                    Some(self.shutdown(ShutdownCause::Disconnected, stop))
                }
            };
            if let Some(cause) = cause {
                return cause;
            }
        }
    }

    /// Applies one event. Returns the shutdown cause once terminated.
    pub fn handle(&mut self, event: ControlEvent, stop: &StopToken) -> Option<ShutdownCause> {
        if self.state == DispatcherState::Terminated {
            return None;
        }
        match event {
            ControlEvent::Shutdown { signal } => {
                Some(self.shutdown(ShutdownCause::Signal(signal), stop))
            }
            ControlEvent::WorkerExited {
                name,
                error: Some(error),
            } => {
                error!(
                    target: SIGNALS_TARGET,
                    worker = %name,
                    error = %error,
                    "worker failed; shutting down"
                );
                Some(self.shutdown(ShutdownCause::WorkerFailed { name, error }, stop))
            }
            ControlEvent::WorkerExited { name, error: None } => {
                warn!(target: SIGNALS_TARGET, worker = %name, "worker exited early");
                None
            }
            ControlEvent::Rotate => {
                self.state = DispatcherState::Rotating;
                if let Err(error) = self.rotate() {
                    error!(
                        target: SIGNALS_TARGET,
                        error = %error,
                        "log rotation failed; keeping current sinks"
                    );
                }
                self.state = DispatcherState::Listening;
                None
            }
            ControlEvent::Reload => {
                self.state = DispatcherState::Reloading;
                if let Err(error) = self.reload() {
                    error!(
                        target: SIGNALS_TARGET,
                        error = %error,
                        "reload failed; keeping current configuration"
                    );
                }
                self.state = DispatcherState::Listening;
                None
            }
        }
    }

    fn shutdown(&mut self, cause: ShutdownCause, stop: &StopToken) -> ShutdownCause {
        self.state = DispatcherState::ShuttingDown;
        info!(target: SIGNALS_TARGET, cause = ?cause, "shutdown requested");
        if let Some(mut pidfile) = self.pidfile.take() {
            pidfile.release();
        }
        stop.trigger();
        self.state = DispatcherState::Terminated;
        cause
    }

    fn rotate(&self) -> Result<(), ReconfigError> {
        let config = Arc::clone(self.context.current().config());
        let sinks = Arc::new(self.sinks.open(&config)?);
        let retired = self.context.replace_sinks(Arc::clone(&sinks));
        self.telemetry.refresh(&sinks);
        let generation = retired.number() + 1;
        self.retire(retired);
        info!(target: SIGNALS_TARGET, generation, "log sinks reopened");
        Ok(())
    }

    fn reload(&self) -> Result<(), ReconfigError> {
        let config = Arc::new(self.loader.load()?);
        let sinks = Arc::new(self.sinks.open(&config)?);
        let retired = self.context.replace(Arc::clone(&config), Arc::clone(&sinks));
        self.telemetry.refresh(&sinks);
        warn_restart_only(retired.config(), &config);
        let generation = retired.number() + 1;
        self.retire(retired);
        info!(target: SIGNALS_TARGET, generation, "configuration reloaded");
        debug!(target: SIGNALS_TARGET, config = %config, "active configuration");
        Ok(())
    }

    fn retire(&self, retired: Arc<Generation>) {
        let sinks = Arc::clone(retired.sinks());
        drop(retired);
        if !sinks.close(self.drain) {
            warn!(
                target: SIGNALS_TARGET,
                drain_ms = self.drain.as_millis(),
                "retired log sinks still referenced after drain"
            );
        }
    }
}

fn warn_restart_only(previous: &Config, next: &Config) {
    let changed = [
        ("servers", previous.servers != next.servers),
        ("daemonize", previous.daemonize != next.daemonize),
        ("daemon", previous.daemon != next.daemon),
    ];
    for (field, _) in changed.iter().filter(|(_, changed)| *changed) {
        warn!(
            target: SIGNALS_TARGET,
            field,
            "change takes effect on the next start"
        );
    }
}
