//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Messaging activity logging and Prometheus counters."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message handed to the broker.
    Outbound,
    /// Message received from the broker.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, topic: &str, payload_len: usize) {
    debug!(
        topic = %topic,
        bytes = payload_len,
        direction = ?direction,
        "messaging activity"
    );
}

/// Prometheus metric handles for messaging and lifecycle activity.
#[derive(Clone)]
pub struct MessagingMetricsExporter {
    published: IntCounter,
    publish_failures: IntCounter,
    received: IntCounter,
    rejected: IntCounter,
    transitions: IntCounterVec,
}

impl MessagingMetricsExporter {
    /// Register the counters with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "vend_messages_published_total",
            "Events and telemetry handed to the broker",
        ))?;
        let publish_failures = IntCounter::with_opts(Opts::new(
            "vend_publish_failures_total",
            "Publishes the transport refused",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "vend_messages_received_total",
            "Inbound command and operation messages",
        ))?;
        let rejected = IntCounter::with_opts(Opts::new(
            "vend_messages_rejected_total",
            "Inbound messages rejected by topic decoding or dispatch",
        ))?;
        let transitions = IntCounterVec::new(
            Opts::new(
                "vend_lifecycle_transitions_total",
                "Machine lifecycle transitions by resulting state",
            ),
            &["state"],
        )?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(publish_failures.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(transitions.clone()))?;

        Ok(Self {
            published,
            publish_failures,
            received,
            rejected,
            transitions,
        })
    }

    /// Record a successful publish.
    pub fn observe_published(&self) {
        self.published.inc();
    }

    /// Record a failed publish.
    pub fn observe_publish_failure(&self) {
        self.publish_failures.inc();
    }

    /// Record an inbound message.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record an inbound message that could not be handled.
    pub fn observe_rejected(&self) {
        self.rejected.inc();
    }

    /// Record a lifecycle transition into `state`.
    pub fn observe_transition(&self, state: &str) {
        self.transitions.with_label_values(&[state]).inc();
    }
}

impl std::fmt::Debug for MessagingMetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingMetricsExporter")
            .field("published", &self.published.get())
            .field("publish_failures", &self.publish_failures.get())
            .field("received", &self.received.get())
            .field("rejected", &self.rejected.get())
            .finish()
    }
}
