//! Connection handling for listener workers.

use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::HTTP_TARGET;
use crate::context::RuntimeContext;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Stream types accepted by the listener.
pub enum ConnectionStream {
    /// Accepted TCP connection.
    Tcp(TcpStream),
    /// Accepted Unix domain connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    fn prepare(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))
            }
            #[cfg(unix)]
            Self::Unix(stream) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))
            }
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Serves one accepted connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

/// Answers `GET /` with a status line and every other request with 404.
#[derive(Debug, Clone)]
pub struct StatusHandler {
    context: RuntimeContext,
}

impl StatusHandler {
    /// Creates a handler reporting on `context`.
    #[must_use]
    pub fn new(context: RuntimeContext) -> Self {
        Self { context }
    }

    fn respond(&self, stream: &mut ConnectionStream) -> io::Result<()> {
        stream.prepare()?;
        let Some(head) = read_request_head(stream)? else {
            debug!(target: HTTP_TARGET, "client closed before sending a request");
            return Ok(());
        };
        let request = RequestLine::parse(&head);
        let response = match &request {
            Some(line) if line.method == "GET" && line.path == "/" => {
                let generation = self.context.current();
                Response::ok(format!(
                    "harbord ok generation={} servers={}\n",
                    generation.number(),
                    generation.config().servers.len()
                ))
            }
            Some(_) => Response::not_found(),
            None => Response::bad_request(),
        };
        info!(
            target: HTTP_TARGET,
            method = request.as_ref().map_or("-", |line| line.method.as_str()),
            path = request.as_ref().map_or("-", |line| line.path.as_str()),
            status = response.status,
            "request served"
        );
        stream.write_all(response.render().as_bytes())?;
        stream.flush()
    }
}

impl ConnectionHandler for StatusHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        if let Err(error) = self.respond(&mut stream) {
            warn!(target: HTTP_TARGET, error = %error, "connection handler error");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct RequestLine {
    method: String,
    path: String,
}

impl RequestLine {
    fn parse(head: &str) -> Option<Self> {
        let line = head.lines().next()?;
        let mut parts = line.split_whitespace();
        let method = parts.next()?;
        let path = parts.next()?;
        let version = parts.next()?;
        if !version.starts_with("HTTP/") || parts.next().is_some() {
            return None;
        }
        Some(Self {
            method: method.to_owned(),
            path: path.to_owned(),
        })
    }
}

struct Response {
    status: u16,
    reason: &'static str,
    body: String,
}

impl Response {
    const fn ok(body: String) -> Self {
        Self {
            status: 200,
            reason: "OK",
            body,
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            body: "not found\n".to_owned(),
        }
    }

    fn bad_request() -> Self {
        Self {
            status: 400,
            reason: "Bad Request",
            body: "bad request\n".to_owned(),
        }
    }

    fn render(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.body.len(),
            self.body
        )
    }
}

/// Reads until the blank line ending the request head.
///
/// Returns `None` when the peer closes without sending anything.
fn read_request_head(stream: &mut ConnectionStream) -> io::Result<Option<String>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = read_chunk_with_retry(stream, &mut chunk)?;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            break;
        }
        buffer.extend(chunk.iter().take(read));
        if head_complete(&buffer) {
            break;
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head exceeds maximum size",
            ));
        }
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

fn head_complete(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|window| window == b"\r\n\r\n")
        || buffer.windows(2).any(|window| window == b"\n\n")
}

fn read_chunk_with_retry(stream: &mut ConnectionStream, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
