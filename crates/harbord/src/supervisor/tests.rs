//! Tests for the worker supervisor.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use super::*;
use crate::tests::support::quiet_context;

enum Behaviour {
    UntilStopped,
    Fail(&'static str),
    Panic,
    IgnoreStop(Duration),
}

struct ScriptedWorker {
    name: &'static str,
    behaviour: Behaviour,
}

impl ScriptedWorker {
    fn boxed(name: &'static str, behaviour: Behaviour) -> Box<dyn Worker> {
        Box::new(Self { name, behaviour })
    }
}

impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        self.name
    }

    fn run(self: Box<Self>, _context: RuntimeContext, stop: StopToken) -> Result<(), WorkerError> {
        match self.behaviour {
            Behaviour::UntilStopped => {
                while !stop.wait_timeout(Duration::from_secs(60)) {}
                Ok(())
            }
            Behaviour::Fail(message) => Err(WorkerError::Io(io::Error::other(message))),
            Behaviour::Panic => panic!("scripted panic"),
            Behaviour::IgnoreStop(duration) => {
                thread::sleep(duration);
                Ok(())
            }
        }
    }
}

struct Notifier {
    sender: Sender<ControlEvent>,
    receiver: Receiver<ControlEvent>,
}

#[fixture]
fn notifier() -> Notifier {
    let (sender, receiver) = mpsc::channel();
    Notifier { sender, receiver }
}

#[rstest]
fn stop_collects_clean_completions(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(
        vec![
            ScriptedWorker::boxed("alpha", Behaviour::UntilStopped),
            ScriptedWorker::boxed("beta", Behaviour::UntilStopped),
        ],
        &context,
        &notifier.sender,
    )
    .expect("start workers");
    assert_eq!(supervisor.worker_names().collect::<Vec<_>>(), ["alpha", "beta"]);

    let report = supervisor.stop(Duration::from_secs(5));
    let mut completed = report.completed.clone();
    completed.sort();
    assert_eq!(completed, ["alpha", "beta"]);
    assert!(report.is_clean());
    assert!(notifier.receiver.try_recv().is_err(), "stopped workers are not early exits");
}

#[rstest]
fn stop_is_bounded_by_grace(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(
        vec![
            ScriptedWorker::boxed("stubborn", Behaviour::IgnoreStop(Duration::from_secs(3))),
            ScriptedWorker::boxed("polite", Behaviour::UntilStopped),
        ],
        &context,
        &notifier.sender,
    )
    .expect("start workers");

    let started = Instant::now();
    let report = supervisor.stop(Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.timed_out, ["stubborn"]);
    assert_eq!(report.completed, ["polite"]);
    assert!(!report.is_clean());
}

#[rstest]
fn early_failures_notify_the_dispatcher(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(
        vec![ScriptedWorker::boxed("broken", Behaviour::Fail("socket gone"))],
        &context,
        &notifier.sender,
    )
    .expect("start workers");

    let event = notifier
        .receiver
        .recv_timeout(Duration::from_secs(5))
        .expect("exit notification");
    match event {
        ControlEvent::WorkerExited { name, error } => {
            assert_eq!(name, "broken");
            assert!(error.is_some_and(|message| message.contains("socket gone")));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let report = supervisor.stop(Duration::from_secs(1));
    assert_eq!(report.failed.len(), 1);
    assert!(report.timed_out.is_empty());
}

#[rstest]
fn panics_are_reported_as_failures(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(
        vec![ScriptedWorker::boxed("fragile", Behaviour::Panic)],
        &context,
        &notifier.sender,
    )
    .expect("start workers");
    let report = supervisor.stop(Duration::from_secs(5));
    match report.failed.as_slice() {
        [(name, message)] => {
            assert_eq!(name, "fragile");
            assert!(message.contains("scripted panic"), "unexpected message {message}");
        }
        other => panic!("unexpected failures {other:?}"),
    }
}

#[rstest]
fn unrepresentable_grace_still_returns(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(
        vec![ScriptedWorker::boxed("steady", Behaviour::UntilStopped)],
        &context,
        &notifier.sender,
    )
    .expect("start workers");

    let report = supervisor.stop(Duration::MAX);
    assert_eq!(report.completed, ["steady"]);
    assert!(report.is_clean());
}

#[rstest]
fn stop_without_workers_returns_at_once(notifier: Notifier) {
    let context = quiet_context();
    let supervisor = Supervisor::start(Vec::new(), &context, &notifier.sender).expect("start");
    let started = Instant::now();
    let report = supervisor.stop(Duration::MAX);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report, ShutdownReport::default());
}
