//! Bound listener sockets and the worker that accepts on them.

use std::fs;
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use harbor_config::ServerEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};
use crate::context::RuntimeContext;
use crate::supervisor::{StopToken, Worker, WorkerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const MAX_CONNECTIONS: usize = 64;

/// Socket bound to one configured endpoint.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: ServerEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale Unix socket file if one is left.
    pub fn bind(endpoint: &ServerEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            ServerEndpoint::Inet { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            ServerEndpoint::Unix { path } => {
                endpoint.prepare_filesystem()?;
                ListenerKind::Unix(bind_unix(path)?)
            }
        };
        info!(target: LISTENER_TARGET, endpoint = %endpoint, "listener bound");
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    /// Endpoint this socket was bound for.
    #[must_use]
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Address of a TCP socket, useful after binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            ListenerKind::Unix(_) => None,
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match &self.listener {
            ListenerKind::Tcp(tcp) => tcp.accept().map(|(stream, _)| ConnectionStream::Tcp(stream)),
            ListenerKind::Unix(unix) => unix
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let ServerEndpoint::Unix { path } = &self.endpoint {
            remove_socket_file(path);
        }
    }
}

/// Worker accepting connections on a bound socket until stopped.
///
/// Connections are served on their own threads, at most `limit` at a time.
/// The worker joins every connection thread before it returns, so in-flight
/// requests finish within the supervisor's grace period.
pub struct ListenerWorker {
    name: String,
    listener: SocketListener,
    handler: Arc<dyn ConnectionHandler>,
    limit: usize,
}

impl ListenerWorker {
    /// Wraps a bound socket; each accepted connection goes to `handler`.
    #[must_use]
    pub fn new(listener: SocketListener, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            name: format!("listener {}", listener.endpoint()),
            listener,
            handler,
            limit: MAX_CONNECTIONS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_connection_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn serve(&self, stream: ConnectionStream, connections: &mut Vec<thread::JoinHandle<()>>) {
        self.reap(connections);
        if connections.len() >= self.limit {
            warn!(
                target: LISTENER_TARGET,
                endpoint = %self.listener.endpoint(),
                limit = self.limit,
                "connection limit reached; dropping connection"
            );
            return;
        }
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name("connection".to_owned())
            .spawn(move || handler.handle(stream));
        match spawned {
            Ok(handle) => connections.push(handle),
            Err(error) => warn!(
                target: LISTENER_TARGET,
                endpoint = %self.listener.endpoint(),
                error = %error,
                "failed to spawn connection thread; dropping connection"
            ),
        }
    }

    /// Joins finished connection threads and keeps the running ones.
    fn reap(&self, connections: &mut Vec<thread::JoinHandle<()>>) {
        let (finished, running): (Vec<_>, Vec<_>) = mem::take(connections)
            .into_iter()
            .partition(thread::JoinHandle::is_finished);
        *connections = running;
        for handle in finished {
            self.join_connection(handle);
        }
    }

    fn join_connection(&self, handle: thread::JoinHandle<()>) {
        if handle.join().is_err() {
            warn!(
                target: LISTENER_TARGET,
                endpoint = %self.listener.endpoint(),
                "connection handler panicked"
            );
        }
    }
}

impl Worker for ListenerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, _context: RuntimeContext, stop: StopToken) -> Result<(), WorkerError> {
        self.listener
            .set_nonblocking()
            .map_err(|source| ListenerError::NonBlocking {
                endpoint: self.listener.endpoint().to_string(),
                source,
            })?;
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint(),
            "listener accepting connections"
        );
        let mut last_error = None::<io::ErrorKind>;
        let mut connections = Vec::new();
        while !stop.is_stopped() {
            match self.listener.accept() {
                Ok(Some(stream)) => {
                    last_error = None;
                    self.serve(stream, &mut connections);
                }
                Ok(None) => {
                    stop.wait_timeout(ACCEPT_BACKOFF);
                }
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            endpoint = %self.listener.endpoint(),
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    stop.wait_timeout(ERROR_BACKOFF);
                }
            }
        }
        debug!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint(),
            in_flight = connections.len(),
            "listener stopped; draining connections"
        );
        for handle in connections {
            self.join_connection(handle);
        }
        Ok(())
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

fn bind_unix(path: &Utf8Path) -> Result<UnixListener, ListenerError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(ListenerError::UnixNotSocket {
                    path: path.to_path_buf(),
                });
            }
            match UnixStream::connect(path) {
                Ok(_stream) => {
                    return Err(ListenerError::UnixInUse {
                        path: path.to_path_buf(),
                    });
                }
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    debug!(target: LISTENER_TARGET, path = %path, "removing stale unix socket");
                    fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                        path: path.to_path_buf(),
                        source,
                    })?;
                }
                Err(source) => {
                    return Err(ListenerError::UnixConnect {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ListenerError::UnixMetadata {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_socket_file(path: &Utf8Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
