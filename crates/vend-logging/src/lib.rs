//! ---
//! vend_section: "03-logging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Structured logging helpers and the async dated-file sink."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging building blocks shared by the vending fleet workspace.

use tracing::Level;

pub mod layer;
pub mod macros;
pub mod sink;

pub use layer::{sink_level, LogSinkLayer};
pub use sink::{LogEntry, LogLevel, LogSink, LogSinkError, DEFAULT_FLUSH_TIMEOUT};

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Machine the event concerns.
    pub machine: Option<u32>,
    /// Hardware manager involved (cash, beverage, ...).
    pub manager: Option<&'a str>,
    /// Lifecycle state at the time of the event.
    pub state: Option<&'a str>,
    /// MQTT topic that triggered or carried the event.
    pub topic: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a machine identifier.
    pub fn with_machine(mut self, machine: u32) -> Self {
        self.machine = Some(machine);
        self
    }

    /// Attach a manager name.
    pub fn with_manager(mut self, manager: &'a str) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Attach a lifecycle state.
    pub fn with_state(mut self, state: &'a str) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach a topic.
    pub fn with_topic(mut self, topic: &'a str) -> Self {
        self.topic = Some(topic);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed but some steps failed.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with its outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                machine_id = ctx.machine,
                manager = ctx.manager,
                state = ctx.state,
                topic = ctx.topic,
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Degraded => emit!(Level::WARN),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}
