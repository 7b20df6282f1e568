//! Starts long-running workers and stops them within a grace period.

mod stop;

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::stop::StopToken;
use crate::context::RuntimeContext;
use crate::signals::ControlEvent;
use crate::transport::ListenerError;

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// A long-running task owned by the supervisor.
///
/// Workers read configuration through [`RuntimeContext::current`] for each
/// unit of work and return once `stop` is triggered.
pub trait Worker: Send {
    /// Name used in thread names, logs and shutdown reports.
    fn name(&self) -> &str;

    /// Runs until `stop` is triggered or the worker fails.
    fn run(self: Box<Self>, context: RuntimeContext, stop: StopToken) -> Result<(), WorkerError>;
}

/// Errors reported by workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker '{name}': {source}")]
    Spawn {
        /// Worker name.
        name: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The worker panicked.
    #[error("worker panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// A listener failed while serving.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The worker hit an IO failure it cannot recover from.
    #[error("worker IO failure: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of [`Supervisor::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that returned cleanly.
    pub completed: Vec<String>,
    /// Workers that returned an error, with its message.
    pub failed: Vec<(String, String)>,
    /// Workers still running when the grace period ended.
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    /// Whether every worker finished cleanly in time.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

struct Completion {
    index: usize,
    result: Result<(), WorkerError>,
}

struct RunningWorker {
    name: String,
    handle: Option<thread::JoinHandle<()>>,
}

/// Owns the worker threads and their shared stop token.
pub struct Supervisor {
    stop: StopToken,
    completions: Receiver<Completion>,
    workers: Vec<RunningWorker>,
}

impl Supervisor {
    /// Spawns one thread per worker.
    ///
    /// A worker that returns before stop is requested is reported to
    /// `notifier` as [`ControlEvent::WorkerExited`].
    pub fn start(
        workers: Vec<Box<dyn Worker>>,
        context: &RuntimeContext,
        notifier: &Sender<ControlEvent>,
    ) -> Result<Self, WorkerError> {
        let stop = StopToken::new();
        let (completed, completions) = mpsc::channel();
        let mut running = Vec::with_capacity(workers.len());

        for (index, worker) in workers.into_iter().enumerate() {
            let name = worker.name().to_owned();
            let spawned = thread::Builder::new().name(name.clone()).spawn({
                let context = context.clone();
                let stop = stop.clone();
                let notifier = notifier.clone();
                let completed = completed.clone();
                let name = name.clone();
                move || {
                    let result = run_worker(worker, context, stop.clone());
                    if !stop.is_stopped() {
                        let error = result.as_ref().err().map(ToString::to_string);
                        if notifier
                            .send(ControlEvent::WorkerExited {
                                name: name.clone(),
                                error,
                            })
                            .is_err()
                        {
                            debug!(target: SUPERVISOR_TARGET, worker = %name, "dispatcher gone");
                        }
                    }
                    if completed.send(Completion { index, result }).is_err() {
                        debug!(target: SUPERVISOR_TARGET, worker = %name, "supervisor gone");
                    }
                }
            });
            match spawned {
                Ok(handle) => {
                    info!(target: SUPERVISOR_TARGET, worker = %name, "worker started");
                    running.push(RunningWorker {
                        name,
                        handle: Some(handle),
                    });
                }
                Err(source) => {
                    stop.trigger();
                    return Err(WorkerError::Spawn { name, source });
                }
            }
        }

        Ok(Self {
            stop,
            completions,
            workers: running,
        })
    }

    /// Token that stops every worker when triggered.
    #[must_use]
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Names of the supervised workers, in start order.
    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|worker| worker.name.as_str())
    }

    /// Broadcasts stop and waits up to `grace` for every worker.
    ///
    /// Workers still running at the deadline are left detached and listed
    /// as timed out.
    pub fn stop(mut self, grace: Duration) -> ShutdownReport {
        self.stop.trigger();
        // An unrepresentable deadline waits for every worker.
        let deadline = Instant::now().checked_add(grace);
        let mut report = ShutdownReport::default();
        let mut outstanding = self.workers.len();

        while outstanding > 0 {
            let received = match deadline {
                Some(deadline) => self
                    .completions
                    .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    .ok(),
                None => self.completions.recv().ok(),
            };
            let Some(completion) = received else {
                break;
            };
            let Some(worker) = self.workers.get_mut(completion.index) else {
                continue;
            };
            outstanding -= 1;
            if let Some(handle) = worker.handle.take()
                && handle.join().is_err()
            {
                warn!(target: SUPERVISOR_TARGET, worker = %worker.name, "worker thread panicked");
            }
            match completion.result {
                Ok(()) => report.completed.push(worker.name.clone()),
                Err(error) => report.failed.push((worker.name.clone(), error.to_string())),
            }
        }

        report.timed_out = self
            .workers
            .iter()
            .filter(|worker| worker.handle.is_some())
            .map(|worker| worker.name.clone())
            .collect();
        report
    }
}

fn run_worker(
    worker: Box<dyn Worker>,
    context: RuntimeContext,
    stop: StopToken,
) -> Result<(), WorkerError> {
    match panic::catch_unwind(AssertUnwindSafe(move || worker.run(context, stop))) {
        Ok(result) => result,
        Err(payload) => Err(WorkerError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests;
