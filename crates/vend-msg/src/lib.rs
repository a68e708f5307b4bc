//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Topic codec, event envelopes and MQTT transports."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Messaging primitives for the vending fleet: machine-scoped topic encoding,
//! the event envelope, and the transport seam with in-memory and MQTT
//! implementations.

use std::time::Duration;

pub mod metrics;
pub mod mqtt;
pub mod topic;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Topic decode failures. Both reject the inbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Fewer than two `/`-separated segments.
    #[error("invalid topic format '{topic}': expected <namespace>/<machine-id>/...")]
    InvalidTopicFormat {
        /// Offending topic.
        topic: String,
    },
    /// The machine id segment is not a non-negative decimal integer.
    #[error("invalid machine id '{segment}' in topic '{topic}'")]
    InvalidMachineId {
        /// Offending topic.
        topic: String,
        /// Segment found at the machine id position.
        segment: String,
    },
}

/// Failures reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Operation requires an established connection.
    #[error("transport is not connected")]
    NotConnected,
    /// Connecting failed after every allowed attempt.
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Last failure observed.
        reason: String,
    },
    /// The broker did not acknowledge the connection in time.
    #[error("connection not acknowledged within {0:?}")]
    Timeout(Duration),
    /// The client rejected a request.
    #[error("client error: {0}")]
    Client(String),
}

/// Error enumeration for the messaging crate.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Topic could not be decoded.
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use metrics::{log_message, MessageDirection, MessagingMetricsExporter};
pub use mqtt::{client_id, reconnect_delay, RumqttTransport};
pub use topic::{decode, decode_machine_id, encode_topic, topic_matches, DecodedTopic, TopicCodec};
pub use transport::{
    InMemoryTransport, InboundHandler, InboundMessage, MqttTransport, PublishedMessage,
    SubscriptionTable,
};
pub use types::{EventEnvelope, EventKind};
