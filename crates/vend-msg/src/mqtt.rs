//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "rumqttc-backed transport with reconnect and resubscribe."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Broker transport built on `rumqttc`.
//!
//! `connect` retries up to `max_retry_attempts` times with exponential
//! backoff and returns once the broker acknowledged the session. A spawned
//! driver task then polls the event loop: it routes inbound publishes to the
//! [`SubscriptionTable`], and after a dropped link it keeps reconnecting with
//! the same backoff until the attempts are exhausted. Every ConnAck restores
//! all registered filters and republishes the retained `online` status that
//! the last-will flips to `offline`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vend_common::MqttConfig;

use crate::metrics::{log_message, MessageDirection};
use crate::transport::{InboundHandler, InboundMessage, MqttTransport, SubscriptionTable};
use crate::TransportError;

const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const STATUS_ONLINE: &str = "online";
const STATUS_OFFLINE: &str = "offline";

/// `<prefix><name>_<uuid>`, unique per process start.
pub fn client_id(prefix: &str, name: &str) -> String {
    format!("{}{}_{}", prefix, name, Uuid::new_v4().simple())
}

/// Backoff before retry number `attempt` (zero based): `base * 2^attempt`.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn qos_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

struct Session {
    client: AsyncClient,
    stopping: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Transport speaking MQTT 3.1.1 to a broker.
pub struct RumqttTransport {
    name: String,
    client_id: String,
    config: MqttConfig,
    qos: QoS,
    subscriptions: SubscriptionTable,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for RumqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RumqttTransport")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("broker", &format_args!("{}:{}", self.config.host, self.config.port))
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl RumqttTransport {
    /// Create a disconnected transport; `name` is folded into the client id.
    pub fn new(name: impl Into<String>, config: MqttConfig) -> Self {
        let name = name.into();
        Self {
            client_id: client_id(&config.client_id_prefix, &name),
            qos: qos_level(config.qos),
            name,
            config,
            subscriptions: SubscriptionTable::new(),
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    /// Client identifier presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Retained topic carrying `online`/`offline` for this client.
    pub fn status_topic(&self) -> String {
        format!("clients/{}/status", self.client_id)
    }

    /// Filters that will be (re)subscribed on every connect.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.filters()
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.client_id.clone(), self.config.host.clone(), self.config.port);
        options
            .set_keep_alive(self.config.keep_alive)
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                self.status_topic(),
                STATUS_OFFLINE,
                self.qos,
                true,
            ));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }

    async fn open_session(&self) -> Result<Session, TransportError> {
        let (client, mut eventloop) =
            AsyncClient::new(self.options(), self.config.request_capacity.max(1));

        let acknowledged = tokio::time::timeout(self.config.connection_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(err) => return Err(TransportError::Client(err.to_string())),
                }
            }
        })
        .await;
        match acknowledged {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(TransportError::Timeout(self.config.connection_timeout)),
        }

        self.connected.store(true, Ordering::SeqCst);
        let context = DriverContext {
            client: client.clone(),
            name: self.name.clone(),
            status_topic: self.status_topic(),
            qos: self.qos,
            subscriptions: self.subscriptions.clone(),
            connected: Arc::clone(&self.connected),
            stopping: Arc::new(AtomicBool::new(false)),
            retry_interval: self.config.retry_interval,
            max_retry_attempts: self.config.max_retry_attempts,
        };
        context.restore_session();
        let stopping = Arc::clone(&context.stopping);
        let driver = tokio::spawn(drive(eventloop, context));

        Ok(Session {
            client,
            stopping,
            driver,
        })
    }

    async fn active_client(&self) -> Result<AsyncClient, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            stale.stopping.store(true, Ordering::SeqCst);
            stale.driver.abort();
        }

        let attempts = self.config.max_retry_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            match self.open_session().await {
                Ok(opened) => {
                    *session = Some(opened);
                    info!(
                        transport = %self.name,
                        client_id = %self.client_id,
                        broker = %self.config.host,
                        port = self.config.port,
                        attempt = attempt + 1,
                        "mqtt connected"
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        transport = %self.name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %err,
                        "mqtt connect attempt failed"
                    );
                    last_error = err.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(reconnect_delay(self.config.retry_interval, attempt))
                            .await;
                    }
                }
            }
        }
        Err(TransportError::ConnectFailed {
            attempts,
            reason: last_error,
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut active) = self.session.lock().await.take() else {
            return Ok(());
        };
        active.stopping.store(true, Ordering::SeqCst);
        let result = active
            .client
            .disconnect()
            .await
            .map_err(|err| TransportError::Client(err.to_string()));
        if tokio::time::timeout(DRIVER_STOP_TIMEOUT, &mut active.driver)
            .await
            .is_err()
        {
            active.driver.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(transport = %self.name, client_id = %self.client_id, "mqtt disconnected");
        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.active_client().await?;
        let len = payload.len();
        client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| TransportError::Client(err.to_string()))?;
        log_message(MessageDirection::Outbound, topic, len);
        Ok(())
    }

    async fn subscribe(&self, filter: &str, handler: InboundHandler) -> Result<(), TransportError> {
        let first = !self.subscriptions.contains(filter);
        self.subscriptions.insert(filter, handler);
        if first && self.is_connected() {
            let client = self.active_client().await?;
            client
                .subscribe(filter, self.qos)
                .await
                .map_err(|err| TransportError::Client(err.to_string()))?;
        }
        debug!(transport = %self.name, filter = %filter, "subscription registered");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct DriverContext {
    client: AsyncClient,
    name: String,
    status_topic: String,
    qos: QoS,
    subscriptions: SubscriptionTable,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    retry_interval: Duration,
    max_retry_attempts: u32,
}

impl DriverContext {
    /// Queue SUBSCRIBE for every filter plus the retained online status.
    /// Uses the non-blocking client calls since the event loop is not being
    /// polled while this runs.
    fn restore_session(&self) {
        for filter in self.subscriptions.filters() {
            if let Err(err) = self.client.try_subscribe(filter.clone(), self.qos) {
                warn!(transport = %self.name, filter = %filter, error = %err, "resubscribe failed");
            }
        }
        if let Err(err) =
            self.client
                .try_publish(self.status_topic.clone(), self.qos, true, STATUS_ONLINE)
        {
            warn!(transport = %self.name, error = %err, "online status publish failed");
        }
    }
}

async fn drive(mut eventloop: EventLoop, context: DriverContext) {
    let mut failures = 0u32;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                failures = 0;
                context.connected.store(true, Ordering::SeqCst);
                context.restore_session();
                info!(transport = %context.name, "mqtt session re-established");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log_message(MessageDirection::Inbound, &publish.topic, publish.payload.len());
                context.subscriptions.dispatch(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                context.connected.store(false, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                context.connected.store(false, Ordering::SeqCst);
                if context.stopping.load(Ordering::SeqCst) {
                    break;
                }
                if failures >= context.max_retry_attempts {
                    error!(
                        transport = %context.name,
                        attempts = failures,
                        error = %err,
                        "mqtt reconnect attempts exhausted"
                    );
                    break;
                }
                let delay = reconnect_delay(context.retry_interval, failures);
                failures += 1;
                warn!(
                    transport = %context.name,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "mqtt link lost; reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    debug!(transport = %context.name, "mqtt driver stopped");
}
