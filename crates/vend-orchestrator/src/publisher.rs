//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Publishes machine-scoped events and telemetry."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use vend_msg::{
    EventEnvelope, EventKind, MessagingMetricsExporter, MqttTransport, TopicCodec, TransportError,
};

use crate::{OrchestratorError, Result};

/// Suffix of the status telemetry topic.
pub const STATUS_SUFFIX: &str = "status";

/// Publisher bound to one machine and its transport. Failures are reported,
/// never retried.
#[derive(Clone)]
pub struct EventPublisher {
    machine_id: u32,
    codec: TopicCodec,
    transport: Arc<dyn MqttTransport>,
    metrics: Option<MessagingMetricsExporter>,
}

impl EventPublisher {
    /// Bind a publisher to `machine_id`.
    pub fn new(machine_id: u32, codec: TopicCodec, transport: Arc<dyn MqttTransport>) -> Self {
        Self {
            machine_id,
            codec,
            transport,
            metrics: None,
        }
    }

    /// Count publishes into `metrics`.
    pub fn with_metrics(mut self, metrics: MessagingMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Machine the publisher is bound to.
    pub fn machine_id(&self) -> u32 {
        self.machine_id
    }

    /// Topic an event of `kind` is published on.
    pub fn event_topic(&self, kind: EventKind) -> String {
        self.codec.encode(self.machine_id, &kind.topic_suffix())
    }

    /// Publish an event envelope.
    pub async fn publish(&self, kind: EventKind, description: impl Into<String>) -> Result<()> {
        let envelope = EventEnvelope::new(self.machine_id, kind, description);
        let payload = serde_json::to_vec(&envelope)?;
        self.send(&kind.topic_suffix(), payload, kind.as_str()).await
    }

    /// Publish `value` as JSON under `<root>/<id>/<suffix>`.
    pub async fn publish_json<T: Serialize>(&self, suffix: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(suffix, payload, suffix).await
    }

    async fn send(&self, suffix: &str, payload: Vec<u8>, label: &str) -> Result<()> {
        let topic = self.codec.encode(self.machine_id, suffix);
        match self.transport.publish(&topic, payload).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_published();
                }
                debug!(machine_id = self.machine_id, topic = %topic, "published {label}");
                Ok(())
            }
            Err(source) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_publish_failure();
                }
                warn!(
                    machine_id = self.machine_id,
                    topic = %topic,
                    error = %source,
                    "publish failed"
                );
                Err(self.failure(label, source))
            }
        }
    }

    fn failure(&self, label: &str, source: TransportError) -> OrchestratorError {
        OrchestratorError::PublishFailed {
            machine_id: self.machine_id,
            event: label.to_owned(),
            source,
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("machine_id", &self.machine_id)
            .field("codec", &self.codec)
            .field("transport", &self.transport.name())
            .finish()
    }
}
