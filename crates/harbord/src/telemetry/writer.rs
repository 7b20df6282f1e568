//! `MakeWriter` that resolves the active sink set per event.

use std::io;
use std::sync::Arc;

use harbor_config::LogFormat;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;

use super::sinks::{LogSinkSet, Route};
use crate::context::RuntimeContext;

/// Writer factory for one fmt layer.
///
/// Each layer renders a single format; the writer stays silent when the
/// active generation is configured for the other one.
#[derive(Debug, Clone)]
pub(crate) struct SinkWriter {
    context: RuntimeContext,
    format: LogFormat,
}

impl SinkWriter {
    pub(crate) fn new(context: RuntimeContext, format: LogFormat) -> Self {
        Self { context, format }
    }
}

/// Writer bound to one event. Holds the sink set until the event is written.
#[derive(Debug, Default)]
pub(crate) struct EventWriter {
    sinks: Option<Arc<LogSinkSet>>,
    route: Route,
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter::default()
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        let generation = self.context.current();
        let sinks = generation.sinks();
        if sinks.format() != self.format {
            return EventWriter::default();
        }
        let route = sinks.route(meta.target(), meta.level());
        if route.is_empty() {
            return EventWriter::default();
        }
        EventWriter {
            sinks: Some(Arc::clone(sinks)),
            route,
        }
    }
}

impl io::Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(sinks) = &self.sinks {
            sinks.write(&self.route, buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
