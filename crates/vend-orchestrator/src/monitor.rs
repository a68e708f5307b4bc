//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Fleet monitor turning status telemetry into alerts."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Watches `<root>/+/status` for every machine, keeps the last status per
//! machine, and publishes an [`Alert`] on `<root>/<id>/alerts` when a stock,
//! cash or lifecycle condition first appears. Critical alerts are also
//! published as a [`MaintenanceNotice`] on `<root>/<id>/maintenance-requests`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vend_msg::{InboundHandler, InboundMessage, MqttTransport, TopicCodec};

use crate::publisher::STATUS_SUFFIX;
use crate::state::MachineState;
use crate::Result;

/// Suffix alerts are published under.
pub const ALERT_SUFFIX: &str = "alerts";
/// Suffix maintenance notices are published under.
pub const MAINTENANCE_REQUEST_SUFFIX: &str = "maintenance-requests";
/// Consecutive publish failures after which a machine's alerts are reported as lost.
pub const ALERT_FAILURE_LIMIT: u32 = 3;

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention soon.
    Warning,
    /// Needs a technician; also raises a maintenance notice.
    Critical,
}

impl Severity {
    /// Numeric level, 1 to 3.
    pub fn level(&self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }
}

/// Condition that raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// A cartridge fell below a fifth of its capacity.
    CartridgeLow,
    /// A cartridge is empty.
    CartridgeEmpty,
    /// The cash box passed 90 % of its capacity.
    CashBoxFull,
    /// The cash box reached its capacity.
    CashBoxAtCapacity,
    /// The lifecycle state changed.
    StateChanged,
}

impl AlertKind {
    fn severity(&self) -> Severity {
        match self {
            AlertKind::StateChanged => Severity::Info,
            AlertKind::CartridgeLow | AlertKind::CashBoxFull => Severity::Warning,
            AlertKind::CartridgeEmpty | AlertKind::CashBoxAtCapacity => Severity::Critical,
        }
    }
}

/// Alert published for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Machine the alert concerns.
    pub machine_id: u32,
    /// What happened.
    pub kind: AlertKind,
    /// Human-readable detail.
    pub message: String,
    /// Urgency.
    pub severity: Severity,
    /// When the monitor raised it.
    pub timestamp: DateTime<Utc>,
}

/// Request for a technician, derived from a critical alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    /// Machine to visit.
    pub machine_id: u32,
    /// Alert detail.
    pub message: String,
    /// When the notice was raised.
    pub timestamp: DateTime<Utc>,
    /// Always set for notices raised by the monitor.
    pub urgent: bool,
}

/// Level of one cartridge as last reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredCartridge {
    /// Display name.
    pub name: String,
    /// Units in stock.
    pub quantity: u32,
    /// Maximum units.
    pub capacity: u32,
}

/// Last status the monitor saw for a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredStatus {
    /// Lifecycle state.
    pub state: MachineState,
    /// Collected cash.
    pub cash_balance_cents: u64,
    /// Cash box capacity.
    pub cash_capacity_cents: u64,
    /// Cartridge levels.
    pub cartridges: Vec<MonitoredCartridge>,
    /// When the status was received.
    pub received_at: DateTime<Utc>,
}

impl MonitoredStatus {
    fn conditions(&self) -> Vec<(AlertKind, String)> {
        let mut conditions = Vec::new();
        for cartridge in &self.cartridges {
            let detail = format!(
                "{} at {} of {}",
                cartridge.name, cartridge.quantity, cartridge.capacity
            );
            if u64::from(cartridge.quantity) * 5 < u64::from(cartridge.capacity) {
                conditions.push((AlertKind::CartridgeLow, detail.clone()));
            }
            if cartridge.quantity == 0 {
                conditions.push((AlertKind::CartridgeEmpty, detail));
            }
        }
        let cash = format!(
            "cash box at {} of {} cents",
            self.cash_balance_cents, self.cash_capacity_cents
        );
        if self.cash_balance_cents * 10 > self.cash_capacity_cents * 9 {
            conditions.push((AlertKind::CashBoxFull, cash.clone()));
        }
        if self.cash_capacity_cents > 0 && self.cash_balance_cents >= self.cash_capacity_cents {
            conditions.push((AlertKind::CashBoxAtCapacity, cash));
        }
        conditions
    }
}

#[derive(Deserialize)]
struct StatusMessage {
    state: MachineState,
    snapshot: SnapshotView,
}

#[derive(Deserialize)]
struct SnapshotView {
    cash: CashView,
    cartridges: CartridgesView,
}

#[derive(Deserialize)]
struct CashView {
    balance_cents: u64,
    capacity_cents: u64,
}

#[derive(Deserialize)]
struct CartridgesView {
    cartridges: Vec<MonitoredCartridge>,
}

impl From<StatusMessage> for MonitoredStatus {
    fn from(message: StatusMessage) -> Self {
        Self {
            state: message.state,
            cash_balance_cents: message.snapshot.cash.balance_cents,
            cash_capacity_cents: message.snapshot.cash.capacity_cents,
            cartridges: message.snapshot.cartridges.cartridges,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Tracked {
    status: Option<MonitoredStatus>,
    publish_failures: u32,
}

/// Fleet-wide status monitor.
pub struct FleetMonitor {
    codec: TopicCodec,
    transport: Arc<dyn MqttTransport>,
    machines: Mutex<IndexMap<u32, Tracked>>,
}

impl FleetMonitor {
    /// Monitor every machine under `codec`'s root through `transport`.
    pub fn new(codec: TopicCodec, transport: Arc<dyn MqttTransport>) -> Self {
        Self {
            codec,
            transport,
            machines: Mutex::new(IndexMap::new()),
        }
    }

    /// Filter the monitor subscribes to.
    pub fn status_filter(&self) -> String {
        self.codec.fleet_filter(STATUS_SUFFIX)
    }

    /// Last status seen for `machine_id`.
    pub fn snapshot(&self, machine_id: u32) -> Option<MonitoredStatus> {
        self.machines
            .lock()
            .get(&machine_id)
            .and_then(|tracked| tracked.status.clone())
    }

    /// Machines that reported at least one status, in order of first report.
    pub fn machine_ids(&self) -> Vec<u32> {
        self.machines
            .lock()
            .iter()
            .filter(|(_, tracked)| tracked.status.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Subscribe to fleet status and spawn the worker that evaluates it.
    /// The transport must already be connected.
    pub async fn start(self: &Arc<Self>, queue_capacity: usize) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(queue_capacity.max(1));
        let handler: InboundHandler = Arc::new(move |message: InboundMessage| {
            if let Err(err) = tx.try_send(message) {
                warn!(error = %err, "status update dropped by monitor");
            }
        });
        let filter = self.status_filter();
        self.transport.subscribe(&filter, handler).await?;
        info!(filter = %filter, "monitoring fleet status");

        let monitor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(err) = monitor.observe(&message.topic, &message.payload).await {
                    warn!(topic = %message.topic, error = %err, "status update ignored");
                }
            }
        }))
    }

    /// Record one status message and publish the alerts it raises.
    pub async fn observe(&self, topic: &str, payload: &[u8]) -> Result<Vec<Alert>> {
        let machine_id = self.codec.decode(topic)?.machine_id;
        let status = MonitoredStatus::from(serde_json::from_slice::<StatusMessage>(payload)?);
        let alerts = {
            let mut machines = self.machines.lock();
            let tracked = machines.entry(machine_id).or_default();
            let alerts = evaluate(machine_id, tracked.status.as_ref(), &status);
            tracked.status = Some(status);
            alerts
        };
        for alert in &alerts {
            self.send(alert).await;
        }
        Ok(alerts)
    }

    async fn send(&self, alert: &Alert) {
        let delivered = self
            .publish(alert.machine_id, ALERT_SUFFIX, alert)
            .await
            .is_ok();
        self.record_delivery(alert.machine_id, delivered);
        if delivered && alert.severity == Severity::Critical {
            let notice = MaintenanceNotice {
                machine_id: alert.machine_id,
                message: alert.message.clone(),
                timestamp: alert.timestamp,
                urgent: true,
            };
            if let Err(err) = self
                .publish(alert.machine_id, MAINTENANCE_REQUEST_SUFFIX, &notice)
                .await
            {
                warn!(machine_id = alert.machine_id, error = %err, "maintenance notice dropped");
            }
        }
    }

    async fn publish<T: Serialize>(&self, machine_id: u32, suffix: &str, value: &T) -> Result<()> {
        let topic = self.codec.encode(machine_id, suffix);
        let payload = serde_json::to_vec(value)?;
        match self.transport.publish(&topic, payload).await {
            Ok(()) => {
                debug!(machine_id, topic = %topic, "monitor published");
                Ok(())
            }
            Err(err) => {
                warn!(machine_id, topic = %topic, error = %err, "monitor publish failed");
                Err(err.into())
            }
        }
    }

    fn record_delivery(&self, machine_id: u32, delivered: bool) {
        let mut machines = self.machines.lock();
        let tracked = machines.entry(machine_id).or_default();
        if delivered {
            tracked.publish_failures = 0;
            return;
        }
        tracked.publish_failures += 1;
        if tracked.publish_failures >= ALERT_FAILURE_LIMIT {
            error!(
                machine_id,
                failures = tracked.publish_failures,
                "alerts for machine are not being delivered"
            );
        }
    }
}

/// Alerts for conditions present in `current` but not in `previous`, plus a
/// state change when a previous status exists.
fn evaluate(
    machine_id: u32,
    previous: Option<&MonitoredStatus>,
    current: &MonitoredStatus,
) -> Vec<Alert> {
    let active = previous.map(MonitoredStatus::conditions).unwrap_or_default();
    let mut raised: Vec<(AlertKind, String)> = current
        .conditions()
        .into_iter()
        .filter(|condition| !still_active(&active, condition))
        .collect();
    if let Some(previous) = previous.filter(|previous| previous.state != current.state) {
        raised.push((
            AlertKind::StateChanged,
            format!("state changed from {} to {}", previous.state, current.state),
        ));
    }
    raised
        .into_iter()
        .map(|(kind, message)| Alert {
            machine_id,
            kind,
            message,
            severity: kind.severity(),
            timestamp: current.received_at,
        })
        .collect()
}

// Cartridge conditions are keyed by name; cash conditions by kind alone.
fn still_active(active: &[(AlertKind, String)], (kind, detail): &(AlertKind, String)) -> bool {
    active.iter().any(|(seen, seen_detail)| {
        seen == kind
            && match kind {
                AlertKind::CartridgeLow | AlertKind::CartridgeEmpty => {
                    cartridge_name(seen_detail) == cartridge_name(detail)
                }
                _ => true,
            }
    })
}

fn cartridge_name(detail: &str) -> &str {
    detail.split(" at ").next().unwrap_or(detail)
}

impl std::fmt::Debug for FleetMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetMonitor")
            .field("codec", &self.codec)
            .field("transport", &self.transport.name())
            .field("machines", &self.machines.lock().len())
            .finish()
    }
}
