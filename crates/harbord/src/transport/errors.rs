//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use harbor_config::SocketPreparationError;
use thiserror::Error;

/// Errors surfaced while binding or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host name that was resolved.
        host: String,
        /// TCP port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Resolution produced no addresses.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host name that was resolved.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Binding the TCP socket failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Socket address that failed to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The socket parent directory could not be created.
    #[error("failed to prepare socket directory: {0}")]
    Prepare(#[from] SocketPreparationError),
    /// Binding the Unix socket failed.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Unix socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Another process is accepting on the socket path.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Unix socket path.
        path: Utf8PathBuf,
    },
    /// The socket path holds something other than a socket.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Unix socket path.
        path: Utf8PathBuf,
    },
    /// The existing socket path could not be inspected.
    #[error("failed to inspect unix socket {path}: {source}")]
    UnixMetadata {
        /// Unix socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the existing socket failed unexpectedly.
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        /// Unix socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The stale socket file could not be removed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Unix socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The listener could not switch to non-blocking accepts.
    #[error("failed to switch {endpoint} to non-blocking accepts: {source}")]
    NonBlocking {
        /// Endpoint description.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}
