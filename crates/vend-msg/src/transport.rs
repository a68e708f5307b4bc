//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Transport abstraction and the in-memory implementation."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::metrics::{log_message, MessageDirection};
use crate::topic::topic_matches;
use crate::TransportError;

/// Message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Callback invoked for every inbound message matching a filter.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Publish/subscribe transport used by machines.
///
/// Subscriptions outlive connections: a filter registered while disconnected
/// is sent to the broker on the next connect, and every filter is restored
/// after a reconnect.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Establish the broker connection. Connecting twice is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;
    /// Close the broker connection. Disconnecting twice is a no-op.
    async fn disconnect(&self) -> Result<(), TransportError>;
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
    /// Register `handler` for messages matching `filter`.
    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError>;
    /// Whether a connection is currently established.
    fn is_connected(&self) -> bool;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &str;
}

/// Filters and handlers registered on a transport.
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    entries: Arc<RwLock<Vec<(String, InboundHandler)>>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    pub fn insert(&self, filter: &str, handler: InboundHandler) {
        self.entries.write().push((filter.to_owned(), handler));
    }

    /// Distinct filters, in registration order.
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::new();
        for (filter, _) in self.entries.read().iter() {
            if !filters.contains(filter) {
                filters.push(filter.clone());
            }
        }
        filters
    }

    /// Whether `filter` is registered.
    pub fn contains(&self, filter: &str) -> bool {
        self.entries.read().iter().any(|(f, _)| f == filter)
    }

    /// Deliver `message` to every matching handler and return how many ran.
    pub fn dispatch(&self, message: InboundMessage) -> usize {
        let handlers: Vec<InboundHandler> = self
            .entries
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.filters()).finish()
    }
}

/// A message recorded by [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic.
    pub topic: String,
    /// Payload.
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct InMemoryInner {
    name: String,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    fail_disconnect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: SubscriptionTable,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

/// In-process transport that records publishes and lets tests inject inbound
/// traffic. Failures can be switched on per operation.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<InMemoryInner>,
}

impl InMemoryTransport {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self::named("in_memory")
    }

    /// Create a disconnected transport with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(InMemoryInner {
                name: name.into(),
                ..InMemoryInner::default()
            }),
        }
    }

    /// Create a transport that appends `connect`, `publish <topic>` and
    /// `disconnect` to a shared journal.
    pub fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            inner: Arc::new(InMemoryInner {
                name: "in_memory".into(),
                journal: Some(journal),
                ..InMemoryInner::default()
            }),
        }
    }

    /// Make subsequent connects fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent publishes fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent disconnects fail.
    pub fn set_fail_disconnect(&self, fail: bool) {
        self.inner.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.published.lock().clone()
    }

    /// Messages published on topics matching `filter`.
    pub fn published_matching(&self, filter: &str) -> Vec<PublishedMessage> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|message| topic_matches(filter, &message.topic))
            .cloned()
            .collect()
    }

    /// Forget recorded publishes.
    pub fn clear_published(&self) {
        self.inner.published.lock().clear();
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnect attempts.
    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Registered filters.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.filters()
    }

    /// Simulate a broker delivery. Messages are dropped while disconnected.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let payload = payload.into();
        log_message(MessageDirection::Inbound, topic, payload.len());
        self.inner.subscriptions.dispatch(InboundMessage {
            topic: topic.to_owned(),
            payload,
        })
    }

    fn record(&self, entry: String) {
        if let Some(journal) = &self.inner.journal {
            journal.lock().push(entry);
        }
    }
}

#[async_trait]
impl MqttTransport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                attempts: 1,
                reason: "injected connect failure".into(),
            });
        }
        if !self.inner.connected.swap(true, Ordering::SeqCst) {
            self.inner.connects.fetch_add(1, Ordering::SeqCst);
            self.record("connect".into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.record("disconnect".into());
        // The link is considered gone even when the broker never saw the DISCONNECT.
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        if was_connected && self.inner.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::Client("injected disconnect failure".into()));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.record(format!("publish {topic}"));
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Client("injected publish failure".into()));
        }
        log_message(MessageDirection::Outbound, topic, payload.len());
        self.inner.published.lock().push(PublishedMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError> {
        self.inner.subscriptions.insert(filter, handler);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_handler() -> (InboundHandler, Arc<Mutex<Vec<InboundMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: InboundHandler = Arc::new(move |message| sink.lock().push(message));
        (handler, seen)
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let transport = InMemoryTransport::new();
        let err = transport
            .publish("vending/1/status", b"{}".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);

        transport.connect().await.unwrap();
        transport
            .publish("vending/1/status", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_idempotent() {
        let transport = InMemoryTransport::new();
        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 1);
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn inject_routes_to_matching_handlers_only() {
        let transport = InMemoryTransport::new();
        let (commands, seen_commands) = collecting_handler();
        let (status, seen_status) = collecting_handler();
        transport
            .subscribe("vending/+/commands/#", commands)
            .await
            .unwrap();
        transport.subscribe("vending/+/status", status).await.unwrap();

        assert_eq!(transport.inject("vending/4/commands/restart", "{}"), 0);
        transport.connect().await.unwrap();
        assert_eq!(transport.inject("vending/4/commands/restart", "{}"), 1);
        assert_eq!(transport.inject("vending/4/events/shutdown", "{}"), 0);

        let seen = seen_commands.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "vending/4/commands/restart");
        assert!(seen_status.lock().is_empty());
    }

    #[tokio::test]
    async fn subscriptions_survive_reconnect() {
        let transport = InMemoryTransport::new();
        let (handler, seen) = collecting_handler();
        transport.subscribe("vending/1/#", handler).await.unwrap();
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        transport.connect().await.unwrap();
        transport.inject("vending/1/commands/status", Vec::<u8>::new());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(transport.subscriptions(), vec!["vending/1/#".to_owned()]);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let transport = InMemoryTransport::with_journal(Arc::clone(&journal));

        transport.set_fail_connect(true);
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectFailed { .. })
        ));
        transport.set_fail_connect(false);
        transport.connect().await.unwrap();

        transport.set_fail_publish(true);
        assert!(transport.publish("vending/1/x", Vec::new()).await.is_err());
        assert!(transport.published().is_empty());

        transport.set_fail_disconnect(true);
        assert!(transport.disconnect().await.is_err());
        assert!(!transport.is_connected());

        assert_eq!(
            *journal.lock(),
            vec!["connect", "publish vending/1/x", "disconnect"]
        );
    }
}
