//! Startup sequencing for the `run` action.

use std::mem;
use std::sync::Arc;
use std::sync::mpsc;

use tracing::{debug, info, warn};

use super::LIFECYCLE_TARGET;
use super::errors::LaunchError;
use crate::context::RuntimeContext;
use crate::loader::{ConfigLoader, SystemConfigLoader};
use crate::process::{Daemonizer, PidfileGuard, SystemDaemonizer};
use crate::signals::{EventSource, ShutdownCause, SignalDispatcher, SystemSignals};
use crate::supervisor::{ShutdownReport, Supervisor};
use crate::telemetry::{SinkFactory, SystemSinkFactory};
use crate::workers::{SystemWorkers, WorkerFactory};

/// Process-level collaborators: detaching and control events.
pub struct ProcessControl<D, S> {
    /// Detaches the process when the configuration asks for it.
    pub daemonizer: D,
    /// Delivers shutdown, rotate and reload requests.
    pub events: S,
}

/// Service collaborators: configuration, log sinks and workers.
pub struct ServiceDeps<L, F, W> {
    /// Builds the initial snapshot and every reload.
    pub loader: L,
    /// Opens log sinks and installs the subscriber.
    pub sinks: F,
    /// Binds listeners and produces the worker set.
    pub workers: W,
}

/// Everything [`run_with`] needs, injectable for tests.
pub struct LaunchPlan<L, F, D, W, S> {
    /// Process-level collaborators.
    pub process: ProcessControl<D, S>,
    /// Service collaborators.
    pub services: ServiceDeps<L, F, W>,
}

impl
    LaunchPlan<SystemConfigLoader, SystemSinkFactory, SystemDaemonizer, SystemWorkers, SystemSignals>
{
    /// Production collaborators around `loader`.
    #[must_use]
    pub fn system(loader: SystemConfigLoader) -> Self {
        Self {
            process: ProcessControl {
                daemonizer: SystemDaemonizer::new(),
                events: SystemSignals,
            },
            services: ServiceDeps {
                loader,
                sinks: SystemSinkFactory,
                workers: SystemWorkers,
            },
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// This process handed over to a detached child.
    Detached,
    /// The dispatcher terminated and workers were stopped.
    Stopped {
        /// Why the dispatcher terminated.
        cause: ShutdownCause,
        /// Worker completion within the grace period.
        report: ShutdownReport,
    },
}

/// Runs the server until shutdown with injected collaborators.
pub fn run_with<L, F, D, W, S>(plan: LaunchPlan<L, F, D, W, S>) -> Result<RunOutcome, LaunchError>
where
    L: ConfigLoader,
    F: SinkFactory,
    D: Daemonizer,
    W: WorkerFactory,
    S: EventSource,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl { daemonizer, events } = process;
    let ServiceDeps {
        loader,
        sinks: sink_factory,
        workers: worker_factory,
    } = services;

    let config = Arc::new(loader.load()?);
    let sinks = Arc::new(sink_factory.open(&config)?);
    let context = RuntimeContext::new(Arc::clone(&config), sinks);
    let telemetry = sink_factory.install(&context)?;
    telemetry.refresh(context.current().sinks());
    info!(
        target: LIFECYCLE_TARGET,
        pid = std::process::id(),
        daemonize = config.daemonize,
        version = env!("CARGO_PKG_VERSION"),
        "starting harbord"
    );

    let (workers, pidfile) = if config.daemonize {
        PidfileGuard::ensure_vacant(&config.daemon.pidfile)?;
        let workers = worker_factory.prepare(&context)?;
        if !daemonizer.daemonize(&config.daemon)? {
            // The sockets now belong to the child; dropping them here would
            // unlink its Unix socket files.
            mem::forget(workers);
            return Ok(RunOutcome::Detached);
        }
        let pidfile = PidfileGuard::write(&config.daemon.pidfile, config.daemon.pidfile_mode)?;
        (workers, Some(pidfile))
    } else {
        (worker_factory.prepare(&context)?, None)
    };

    let (sender, receiver) = mpsc::channel();
    let forwarder = events.attach(sender.clone())?;
    let supervisor = Supervisor::start(workers, &context, &sender)?;
    drop(sender);
    info!(
        target: LIFECYCLE_TARGET,
        workers = ?supervisor.worker_names().collect::<Vec<_>>(),
        "application started"
    );
    debug!(target: LIFECYCLE_TARGET, config = %config, "using configuration");
    drop(config);

    let mut dispatcher = SignalDispatcher::new(context.clone(), loader, sink_factory, telemetry)
        .with_pidfile(pidfile);
    let cause = dispatcher.run(&receiver, &supervisor.stop_token());
    drop(forwarder);

    let grace = context.current().config().grace_period();
    let report = supervisor.stop(grace);
    log_report(&report, grace);
    Ok(RunOutcome::Stopped { cause, report })
}

fn log_report(report: &ShutdownReport, grace: std::time::Duration) {
    for (worker, error) in &report.failed {
        warn!(target: LIFECYCLE_TARGET, worker = %worker, error = %error, "worker failed");
    }
    if report.is_clean() {
        info!(
            target: LIFECYCLE_TARGET,
            completed = report.completed.len(),
            "shutdown sequence completed"
        );
    } else {
        warn!(
            target: LIFECYCLE_TARGET,
            completed = report.completed.len(),
            failed = report.failed.len(),
            timed_out = ?report.timed_out,
            grace_ms = grace.as_millis(),
            "shutdown finished with unfinished workers"
        );
    }
}
