//! ---
//! vend_section: "02-messaging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Event envelope published by machines."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Kinds of events a machine publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Bring-up finished and the machine is running.
    Initialized,
    /// Shutdown sequence is starting.
    Shutdown,
    /// Restart sequence is starting.
    Restart,
    /// Credit was accepted.
    CreditInserted,
    /// Outstanding credit was handed back.
    CreditReturned,
    /// A beverage is being prepared.
    DispenseStarted,
    /// A beverage was delivered and paid for.
    DispenseCompleted,
    /// Cartridge stock was topped up.
    CartridgesRefilled,
    /// The cash box was emptied by an operator.
    CashBoxEmptied,
    /// A maintenance issue was opened.
    MaintenanceRequested,
    /// A maintenance issue was closed.
    IssueResolved,
    /// A technician put the machine in maintenance mode.
    MaintenanceStarted,
    /// Maintenance mode was lifted.
    MaintenanceEnded,
    /// Non-fatal condition worth an operator's attention.
    Warning,
    /// A request was refused or failed.
    Error,
}

impl EventKind {
    /// Wire name, also used as the last topic segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initialized => "initialized",
            EventKind::Shutdown => "shutdown",
            EventKind::Restart => "restart",
            EventKind::CreditInserted => "credit-inserted",
            EventKind::CreditReturned => "credit-returned",
            EventKind::DispenseStarted => "dispense-started",
            EventKind::DispenseCompleted => "dispense-completed",
            EventKind::CartridgesRefilled => "cartridges-refilled",
            EventKind::CashBoxEmptied => "cash-box-emptied",
            EventKind::MaintenanceRequested => "maintenance-requested",
            EventKind::IssueResolved => "issue-resolved",
            EventKind::MaintenanceStarted => "maintenance-started",
            EventKind::MaintenanceEnded => "maintenance-ended",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
        }
    }

    /// Topic suffix the event is published under.
    pub fn topic_suffix(&self) -> String {
        format!("events/{}", self.as_str())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget event published by one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// What happened.
    pub event_kind: EventKind,
    /// Human-readable detail.
    pub description: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Machine that emitted the event.
    pub machine_id: u32,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(machine_id: u32, event_kind: EventKind, description: impl Into<String>) -> Self {
        Self {
            event_kind,
            description: description.into(),
            timestamp: Utc::now(),
            machine_id,
        }
    }

    /// Serialize to the JSON wire payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a JSON wire payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
