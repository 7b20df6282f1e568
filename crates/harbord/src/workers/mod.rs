//! Built-in workers started under the supervisor.

mod memstats;

use std::sync::Arc;

use crate::context::RuntimeContext;
use crate::supervisor::Worker;
use crate::transport::{
    ConnectionHandler, ListenerError, ListenerWorker, SocketListener, StatusHandler,
};

pub use self::memstats::{MemorySample, MemstatsWorker};

/// Produces the worker set for one run.
///
/// `prepare` is called before the process detaches, so anything that can fail
/// on the terminal (binding sockets) happens here rather than in the workers.
pub trait WorkerFactory {
    /// Binds resources and returns the workers to start.
    fn prepare(&self, context: &RuntimeContext) -> Result<Vec<Box<dyn Worker>>, ListenerError>;
}

/// One listener per configured endpoint plus the memory reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWorkers;

impl WorkerFactory for SystemWorkers {
    fn prepare(&self, context: &RuntimeContext) -> Result<Vec<Box<dyn Worker>>, ListenerError> {
        let generation = context.current();
        let handler: Arc<dyn ConnectionHandler> = Arc::new(StatusHandler::new(context.clone()));
        let mut workers: Vec<Box<dyn Worker>> = Vec::new();
        for endpoint in &generation.config().servers {
            let listener = SocketListener::bind(endpoint)?;
            workers.push(Box::new(ListenerWorker::new(listener, Arc::clone(&handler))));
        }
        workers.push(Box::new(MemstatsWorker::new()));
        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camino::Utf8PathBuf;
    use harbor_config::ServerEndpoint;
    use rstest::rstest;

    use super::*;
    use crate::telemetry::LogSinkSet;
    use crate::tests::support::quiet_config;

    #[rstest]
    fn prepares_a_listener_per_server_and_memstats() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket =
            Utf8PathBuf::from_path_buf(dir.path().join("harbord.sock")).expect("utf8 path");
        let mut config = quiet_config();
        config.servers = vec![
            ServerEndpoint::inet("127.0.0.1", 0),
            ServerEndpoint::unix(socket.clone()),
        ];
        let sinks = LogSinkSet::open(&config).expect("sinks");
        let context = RuntimeContext::new(Arc::new(config), Arc::new(sinks));

        let workers = SystemWorkers.prepare(&context).expect("prepare workers");

        let names: Vec<&str> = workers.iter().map(|worker| worker.name()).collect();
        assert_eq!(
            names,
            [
                "listener tcp://127.0.0.1:0".to_owned(),
                format!("listener unix://{socket}"),
                "memstats".to_owned(),
            ]
        );
        assert!(socket.exists(), "unix socket bound during prepare");
        drop(workers);
        assert!(!socket.exists());
    }

    #[rstest]
    fn bind_failure_aborts_prepare() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("plain")).expect("utf8 path");
        std::fs::write(&path, "x").expect("write file");
        let mut config = quiet_config();
        config.servers = vec![ServerEndpoint::unix(path)];
        let sinks = LogSinkSet::open(&config).expect("sinks");
        let context = RuntimeContext::new(Arc::new(config), Arc::new(sinks));

        let error = SystemWorkers
            .prepare(&context)
            .err()
            .expect("bind should fail");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    }
}
