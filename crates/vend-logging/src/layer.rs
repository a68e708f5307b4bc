//! ---
//! vend_section: "03-logging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "tracing layer forwarding events into the async log sink."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::sink::{LogLevel, LogSink};

/// Forwards every enabled tracing event to a [`LogSink`].
///
/// The `message` field becomes the line body; remaining fields are appended
/// as `key=value` pairs. Rejected entries are counted by the sink and are
/// otherwise ignored so that logging never fails the caller.
#[derive(Debug, Clone)]
pub struct LogSinkLayer {
    sink: LogSink,
    min_level: LogLevel,
}

impl LogSinkLayer {
    /// Forward events at DEBUG and above.
    pub fn new(sink: LogSink) -> Self {
        Self {
            sink,
            min_level: LogLevel::Debug,
        }
    }

    /// Drop events below `level`.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

/// Map a tracing level onto the four sink levels.
pub fn sink_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warning,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

impl<S> Layer<S> for LogSinkLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = sink_level(event.metadata().level());
        if level < self.min_level {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let _ = self.sink.enqueue(level, visitor.finish());
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.fields.is_empty() {
                self.fields.push(' ');
            }
            let _ = write!(self.fields, "{}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DEFAULT_FLUSH_TIMEOUT;
    use tracing_subscriber::prelude::*;

    #[test]
    fn forwards_events_with_fields() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(dir.path(), 32).unwrap();
        let subscriber =
            tracing_subscriber::registry().with(LogSinkLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(machine_id = 7u32, "cash box near full");
            tracing::info!("fleet ready");
        });
        assert!(sink.shutdown(DEFAULT_FLUSH_TIMEOUT));

        let contents = std::fs::read_to_string(sink.current_file()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARNING - cash box near full machine_id=7"));
        assert!(lines[1].ends_with("INFO - fleet ready"));
    }

    #[test]
    fn respects_minimum_level() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(dir.path(), 32).unwrap();
        let layer = LogSinkLayer::new(sink.clone()).with_min_level(LogLevel::Warning);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("noise");
            tracing::info!("more noise");
            tracing::error!(manager = "cash", "power-off failed");
        });
        assert!(sink.shutdown(DEFAULT_FLUSH_TIMEOUT));

        let contents = std::fs::read_to_string(sink.current_file()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("ERROR - power-off failed manager=cash"));
    }

    #[test]
    fn maps_tracing_levels() {
        assert_eq!(sink_level(&Level::TRACE), LogLevel::Debug);
        assert_eq!(sink_level(&Level::DEBUG), LogLevel::Debug);
        assert_eq!(sink_level(&Level::INFO), LogLevel::Info);
        assert_eq!(sink_level(&Level::WARN), LogLevel::Warning);
        assert_eq!(sink_level(&Level::ERROR), LogLevel::Error);
    }
}
