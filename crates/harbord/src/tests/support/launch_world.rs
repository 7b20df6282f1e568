//! World for behaviour tests that run the full lifecycle on a thread.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use harbor_config::{Config, DaemonSettings};
use rstest::fixture;

use super::ConfigFixture;
use crate::context::{Generation, RuntimeContext};
use crate::lifecycle::{
    LaunchError, LaunchPlan, ProcessControl, RunOutcome, ServiceDeps, run_with,
};
use crate::process::{DaemonError, Daemonizer};
use crate::signals::{ControlEvent, EventSource, SignalError};
use crate::supervisor::{StopToken, Worker, WorkerError};
use crate::telemetry::{LogSinkSet, SinkFactory, TelemetryError, TelemetryHandle};
use crate::transport::ListenerError;
use crate::workers::WorkerFactory;

const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Records how often detaching was requested and which process survives.
#[derive(Clone)]
pub(crate) struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
    survive: bool,
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _settings: &DaemonSettings) -> Result<bool, DaemonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.survive)
    }
}

/// Real sink sets, no global subscriber.
#[derive(Clone, Copy)]
pub(crate) struct DetachedSinks;

impl SinkFactory for DetachedSinks {
    fn open(&self, config: &Config) -> Result<LogSinkSet, TelemetryError> {
        LogSinkSet::open(config)
    }

    fn install(&self, _context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError> {
        Ok(TelemetryHandle::detached())
    }
}

/// Hands out idle workers and keeps the context they were given.
#[derive(Clone, Default)]
pub(crate) struct RecordingWorkers {
    context: Arc<Mutex<Option<RuntimeContext>>>,
}

impl WorkerFactory for RecordingWorkers {
    fn prepare(&self, context: &RuntimeContext) -> Result<Vec<Box<dyn Worker>>, ListenerError> {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = Some(context.clone());
        Ok(vec![Box::new(IdleWorker("idle-a")), Box::new(IdleWorker("idle-b"))])
    }
}

struct IdleWorker(&'static str);

impl Worker for IdleWorker {
    fn name(&self) -> &str {
        self.0
    }

    fn run(self: Box<Self>, _context: RuntimeContext, stop: StopToken) -> Result<(), WorkerError> {
        while !stop.wait_timeout(Duration::from_secs(60)) {}
        Ok(())
    }
}

/// Exposes the control channel instead of listening for signals.
#[derive(Clone, Default)]
pub(crate) struct ChannelEvents {
    sender: Arc<Mutex<Option<Sender<ControlEvent>>>>,
}

impl EventSource for ChannelEvents {
    type Guard = ();

    fn attach(&self, events: Sender<ControlEvent>) -> Result<(), SignalError> {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        Ok(())
    }
}

/// What the first generation looked like, without keeping its sinks open.
pub(crate) struct Initial {
    pub(crate) config: Arc<Config>,
    pub(crate) sinks: Weak<LogSinkSet>,
}

/// A configuration file plus a lifecycle run driven through its channel.
pub(crate) struct LaunchWorld {
    fixture: ConfigFixture,
    daemonizer: TestDaemonizer,
    workers: RecordingWorkers,
    events: ChannelEvents,
    initial: Option<Initial>,
    handle: Option<thread::JoinHandle<Result<RunOutcome, LaunchError>>>,
    outcome: Option<Result<RunOutcome, LaunchError>>,
}

#[fixture]
pub(crate) fn world() -> RefCell<LaunchWorld> {
    RefCell::new(LaunchWorld::new())
}

impl LaunchWorld {
    pub(crate) fn new() -> Self {
        Self {
            fixture: ConfigFixture::new(),
            daemonizer: TestDaemonizer {
                calls: Arc::new(AtomicUsize::new(0)),
                survive: true,
            },
            workers: RecordingWorkers::default(),
            events: ChannelEvents::default(),
            initial: None,
            handle: None,
            outcome: None,
        }
    }

    pub(crate) fn fixture(&self) -> &ConfigFixture {
        &self.fixture
    }

    /// Makes the daemonizer report that this process is the parent.
    pub(crate) fn detach_as_parent(&mut self) {
        self.daemonizer.survive = false;
    }

    pub(crate) fn pidfile(&self) -> Utf8PathBuf {
        self.fixture.root().join("run").join("harbord.pid")
    }

    /// Writes a daemonizing configuration with the given memstats period.
    pub(crate) fn write_daemon_config(&self, period: &str) {
        self.fixture.write(&format!(
            "daemonize: true\ndaemon:\n  pidfile: {}\n  pidfile-mode: \"0600\"\nperiod:\n  memstats: {period}\n",
            self.pidfile()
        ));
    }

    pub(crate) fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls.load(Ordering::SeqCst)
    }

    /// Starts `run_with` on a background thread.
    pub(crate) fn start(&mut self) {
        assert!(self.handle.is_none(), "server already started");
        let plan = LaunchPlan {
            process: ProcessControl {
                daemonizer: self.daemonizer.clone(),
                events: self.events.clone(),
            },
            services: ServiceDeps {
                loader: self.fixture.loader(),
                sinks: DetachedSinks,
                workers: self.workers.clone(),
            },
        };
        self.handle = Some(thread::spawn(move || run_with(plan)));
    }

    /// Starts the server and waits until its workers hold a context.
    pub(crate) fn start_and_wait(&mut self) {
        self.start();
        let context = wait_for(|| self.context()).expect("server did not start");
        let current = context.current();
        self.initial = Some(Initial {
            config: Arc::clone(current.config()),
            sinks: Arc::downgrade(current.sinks()),
        });
    }

    pub(crate) fn context(&self) -> Option<RuntimeContext> {
        self.workers
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation installed when the server started.
    pub(crate) fn initial(&self) -> &Initial {
        self.initial.as_ref().expect("server started")
    }

    /// Queues `event` once the control channel is attached.
    pub(crate) fn send(&self, event: ControlEvent) {
        let sender = wait_for(|| {
            self.events
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
        .expect("control channel attached");
        sender.send(event).expect("dispatcher is listening");
    }

    /// Waits until generation `number` (or later) is active and returns it.
    pub(crate) fn wait_for_generation(&self, number: u64) -> Arc<Generation> {
        let context = self.context().expect("server started");
        wait_for(|| {
            let current = context.current();
            (current.number() >= number).then_some(current)
        })
        .unwrap_or_else(|| panic!("generation {number} never became active"))
    }

    /// Waits for the run to return and keeps its result.
    pub(crate) fn join(&mut self) -> &Result<RunOutcome, LaunchError> {
        if let Some(handle) = self.handle.take() {
            let result = handle.join().expect("lifecycle thread panicked");
            self.outcome = Some(result);
        }
        self.outcome.as_ref().expect("server was started")
    }
}

impl Drop for LaunchWorld {
    fn drop(&mut self) {
        if self.handle.is_some() && self.outcome.is_none() {
            if let Some(sender) = self
                .events
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = sender.send(ControlEvent::Shutdown { signal: 15 });
            }
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Calls `poll` until it yields a value or the timeout passes.
pub(crate) fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
