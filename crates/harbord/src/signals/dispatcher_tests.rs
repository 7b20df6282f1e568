//! Tests for the signal dispatcher.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use harbor_config::Config;
use rstest::{fixture, rstest};
use tracing_subscriber::fmt::MakeWriter;

use super::{ControlEvent, DispatcherState, ShutdownCause, SignalDispatcher};
use crate::context::RuntimeContext;
use crate::loader::SystemConfigLoader;
use crate::process::PidfileGuard;
use crate::supervisor::StopToken;
use crate::telemetry::{
    LogSinkSet, SinkFactory, SystemSinkFactory, TelemetryError, TelemetryHandle,
};
use crate::tests::support::ConfigFixture;

/// Opens real sinks until told to fail.
#[derive(Default)]
struct FlakySinks {
    fail: std::sync::atomic::AtomicBool,
}

impl SinkFactory for Arc<FlakySinks> {
    fn open(&self, config: &Config) -> Result<LogSinkSet, TelemetryError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TelemetryError::CreateDir {
                path: config.log.dir.clone(),
                source: std::io::Error::other("disk full"),
            });
        }
        LogSinkSet::open(config)
    }

    fn install(&self, _context: &RuntimeContext) -> Result<TelemetryHandle, TelemetryError> {
        Ok(TelemetryHandle::detached())
    }
}

/// Collects formatted events in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct Rig {
    fixture: ConfigFixture,
    context: RuntimeContext,
    sinks: Arc<FlakySinks>,
    dispatcher: SignalDispatcher<SystemConfigLoader, Arc<FlakySinks>>,
    stop: StopToken,
}

#[fixture]
fn rig() -> Rig {
    let fixture = ConfigFixture::new();
    fixture.write("period:\n  memstats: 2s\n");
    let context = fixture.context();
    let sinks = Arc::new(FlakySinks::default());
    let mut dispatcher = SignalDispatcher::new(
        context.clone(),
        fixture.loader(),
        Arc::clone(&sinks),
        TelemetryHandle::detached(),
    )
    .with_drain(Duration::from_millis(100));
    dispatcher.listen();
    Rig {
        fixture,
        context,
        sinks,
        dispatcher,
        stop: StopToken::new(),
    }
}

#[rstest]
fn starts_idle_until_workers_run() {
    let fixture = ConfigFixture::new();
    let dispatcher = SignalDispatcher::new(
        fixture.context(),
        fixture.loader(),
        SystemSinkFactory,
        TelemetryHandle::detached(),
    );
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

#[rstest]
fn reload_installs_new_pair_and_closes_old_sinks(mut rig: Rig) {
    let before = rig.context.current();
    let old_sinks = Arc::clone(before.sinks());
    drop(before);

    rig.fixture.write("period:\n  memstats: 7s\n");
    assert_eq!(rig.dispatcher.handle(ControlEvent::Reload, &rig.stop), None);

    let after = rig.context.current();
    assert_eq!(after.number(), 1);
    assert_eq!(after.config().period.memstats, Duration::from_secs(7));
    assert!(!Arc::ptr_eq(after.sinks(), &old_sinks));
    assert!(old_sinks.is_closed(), "retired sinks must be closed");
    assert!(!after.sinks().is_closed());
    assert_eq!(rig.dispatcher.state(), DispatcherState::Listening);
}

#[rstest]
#[case::malformed("servers: [\n")]
#[case::invalid("daemon:\n  umask: \"7777\"\n")]
fn failed_reload_keeps_current_pair(mut rig: Rig, #[case] text: &str) {
    let before = rig.context.current();
    rig.fixture.write_raw(text);

    assert_eq!(rig.dispatcher.handle(ControlEvent::Reload, &rig.stop), None);

    let after = rig.context.current();
    assert!(Arc::ptr_eq(&before, &after), "pair must be untouched");
    assert!(!after.sinks().is_closed());
    assert_eq!(rig.dispatcher.state(), DispatcherState::Listening);
    assert!(!rig.stop.is_stopped());
}

#[rstest]
fn failed_reload_logs_the_parse_error(mut rig: Rig) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    rig.fixture.write_raw("servers: [\n");

    tracing::subscriber::with_default(subscriber, || {
        rig.dispatcher.handle(ControlEvent::Reload, &rig.stop);
    });

    let text = logs.text();
    assert!(
        text.contains("reload failed; keeping current configuration"),
        "missing reload failure: {text}"
    );
    assert!(
        text.contains("failed to parse configuration file"),
        "missing parse error: {text}"
    );
    assert_eq!(rig.context.current().number(), 0);
}

#[rstest]
fn retired_sinks_close_after_new_pair_is_visible() {
    let fixture = ConfigFixture::new();
    fixture.write("period:\n  memstats: 2s\n");
    let context = fixture.context();
    let mut dispatcher = SignalDispatcher::new(
        context.clone(),
        fixture.loader(),
        SystemSinkFactory,
        TelemetryHandle::detached(),
    )
    .with_drain(Duration::from_secs(5));
    dispatcher.listen();

    // Stands in for a writer that is mid-event on the old sinks.
    let old_sinks = Arc::clone(context.current().sinks());
    let released = Arc::downgrade(&old_sinks);
    let writer = {
        let context = context.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while context.current().number() == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            let current = context.current();
            let swapped = !Arc::ptr_eq(current.sinks(), &old_sinks);
            let still_open = !old_sinks.is_closed();
            (current.number(), swapped, still_open)
        })
    };

    fixture.write("period:\n  memstats: 3s\n");
    dispatcher.handle(ControlEvent::Reload, &StopToken::new());

    let (number, swapped, still_open) = writer.join().expect("writer thread");
    assert_eq!(number, 1, "writer should see the reloaded generation");
    assert!(swapped, "new sinks must be installed before close");
    assert!(still_open, "old sinks closed while a writer held them");
    assert!(released.upgrade().is_none(), "old sinks outlived the reload");
    assert_eq!(context.current().config().period.memstats, Duration::from_secs(3));
}

#[rstest]
fn reload_with_unopenable_sinks_keeps_current_pair(mut rig: Rig) {
    let before = rig.context.current();
    rig.fixture.write("period:\n  memstats: 9s\n");
    rig.sinks
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    rig.dispatcher.handle(ControlEvent::Reload, &rig.stop);

    let after = rig.context.current();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.config().period.memstats, Duration::from_secs(2));
}

#[rstest]
fn rotate_swaps_only_the_sinks(mut rig: Rig) {
    let before = rig.context.current();
    let old_sinks = Arc::clone(before.sinks());
    let old_config = Arc::clone(before.config());
    drop(before);
    rig.fixture.write("period:\n  memstats: 30s\n");

    rig.dispatcher.handle(ControlEvent::Rotate, &rig.stop);

    let after = rig.context.current();
    assert!(Arc::ptr_eq(after.config(), &old_config), "rotation keeps the snapshot");
    assert!(!Arc::ptr_eq(after.sinks(), &old_sinks));
    assert!(old_sinks.is_closed());
    assert_eq!(rig.dispatcher.state(), DispatcherState::Listening);
}

#[rstest]
fn failed_rotate_keeps_current_sinks(mut rig: Rig) {
    let before = rig.context.current();
    rig.sinks
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    rig.dispatcher.handle(ControlEvent::Rotate, &rig.stop);

    assert!(Arc::ptr_eq(&before, &rig.context.current()));
    assert!(!before.sinks().is_closed());
}

#[rstest]
fn shutdown_releases_pidfile_and_stops_workers(rig: Rig) {
    let pidfile = rig.fixture.root().join("harbord.pid");
    let guard = PidfileGuard::write(&pidfile, 0o644).expect("write pidfile");
    let Rig {
        fixture: _fixture,
        dispatcher,
        stop,
        ..
    } = rig;
    let mut dispatcher = dispatcher.with_pidfile(Some(guard));

    let cause = dispatcher.handle(ControlEvent::Shutdown { signal: 15 }, &stop);

    assert_eq!(cause, Some(ShutdownCause::Signal(15)));
    assert_eq!(dispatcher.state(), DispatcherState::Terminated);
    assert!(stop.is_stopped());
    assert!(!pidfile.exists());
}

#[rstest]
fn clean_early_exit_keeps_listening(mut rig: Rig) {
    let event = ControlEvent::WorkerExited {
        name: "memstats".to_owned(),
        error: None,
    };
    assert_eq!(rig.dispatcher.handle(event, &rig.stop), None);
    assert_eq!(rig.dispatcher.state(), DispatcherState::Listening);
}

#[rstest]
fn failed_worker_terminates(mut rig: Rig) {
    let event = ControlEvent::WorkerExited {
        name: "listener".to_owned(),
        error: Some("accept failed".to_owned()),
    };
    let cause = rig.dispatcher.handle(event, &rig.stop);
    assert!(matches!(cause, Some(ShutdownCause::WorkerFailed { .. })));
    assert!(rig.stop.is_stopped());
}

#[rstest]
fn run_serializes_queued_events(mut rig: Rig) {
    let (sender, receiver) = mpsc::channel();
    rig.fixture.write("period:\n  memstats: 11s\n");
    for event in [
        ControlEvent::Reload,
        ControlEvent::Rotate,
        ControlEvent::Reload,
        ControlEvent::Shutdown { signal: 2 },
        ControlEvent::Reload,
    ] {
        sender.send(event).expect("queue event");
    }

    let cause = rig.dispatcher.run(&receiver, &rig.stop);

    assert_eq!(cause, ShutdownCause::Signal(2));
    assert_eq!(rig.context.current().number(), 3, "events after shutdown are ignored");
    assert_eq!(
        rig.context.current().config().period.memstats,
        Duration::from_secs(11)
    );
}

#[rstest]
fn closed_channel_shuts_down(mut rig: Rig) {
    let (sender, receiver) = mpsc::channel::<ControlEvent>();
    drop(sender);
    assert_eq!(
        rig.dispatcher.run(&receiver, &rig.stop),
        ShutdownCause::Disconnected
    );
    assert!(rig.stop.is_stopped());
}
