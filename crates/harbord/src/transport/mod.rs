//! Minimal socket listeners run as supervised workers.
//!
//! Each configured endpoint gets one [`ListenerWorker`]. Sockets are bound
//! before the process detaches so bind failures surface on the terminal;
//! accepted connections are served on their own threads.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream, StatusHandler};
pub use self::listener::{ListenerWorker, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::listener");
const HTTP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::http");
