//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Lifecycle orchestration kernel for vending machines."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Drives each vending machine through `Initializing → Running →
//! ShuttingDown → Off → Restarting`, publishes its events, and routes inbound
//! fleet commands to the right machine.

use std::fmt;

use serde::Serialize;
use vend_hw::{HardwareError, ManagerKind};
use vend_msg::{EventKind, TopicError, TransportError};

pub mod command;
pub mod fleet;
pub mod monitor;
pub mod orchestrator;
pub mod publisher;
pub mod state;
pub mod timer;

/// Shared result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Step of the shutdown sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "step", content = "target")]
pub enum ShutdownStep {
    /// Publishing the announcement event.
    Announce(EventKind),
    /// Powering off one manager.
    PowerOff(ManagerKind),
    /// Disconnecting the transport.
    Disconnect,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::Announce(kind) => write!(f, "announce {kind}"),
            ShutdownStep::PowerOff(kind) => write!(f, "power off {kind}"),
            ShutdownStep::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// One failed shutdown step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// What was attempted.
    pub step: ShutdownStep,
    /// Why it failed.
    pub reason: String,
}

/// Failures collected while shutting a machine down. Every step is attempted
/// regardless of earlier failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Machine that was shut down.
    pub machine_id: u32,
    /// Steps that failed, in execution order.
    pub failures: Vec<StepFailure>,
}

impl ShutdownReport {
    pub(crate) fn new(machine_id: u32) -> Self {
        Self {
            machine_id,
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: ShutdownStep, reason: impl ToString) {
        self.failures.push(StepFailure {
            step,
            reason: reason.to_string(),
        });
    }

    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether a given step failed.
    pub fn failed(&self, step: ShutdownStep) -> bool {
        self.failures.iter().any(|failure| failure.step == step)
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "machine {} shut down with {} failed step(s)",
            self.machine_id,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.step, failure.reason)?;
        }
        Ok(())
    }
}

/// Why a customer request was refused. The code is published on the `error`
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispenseRejection {
    /// Not in the catalog.
    BeverageUnavailable,
    /// Recipe stock is missing.
    InsufficientCartridges,
    /// Credit does not cover the price.
    InsufficientCredit,
    /// Another dispense holds the dispenser.
    MachineBusy,
    /// A technician has the machine in maintenance mode.
    InMaintenance,
}

impl DispenseRejection {
    /// Error code carried by the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            DispenseRejection::BeverageUnavailable => "beverage-unavailable",
            DispenseRejection::InsufficientCartridges => "insufficient-cartridges",
            DispenseRejection::InsufficientCredit => "insufficient-credit",
            DispenseRejection::MachineBusy => "machine-busy",
            DispenseRejection::InMaintenance => "machine-in-maintenance",
        }
    }
}

impl fmt::Display for DispenseRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error enumeration for the orchestration crate.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The operation is not allowed in the machine's current state.
    #[error("machine {machine_id} cannot {operation} while {state}")]
    InvalidState {
        /// Machine addressed.
        machine_id: u32,
        /// State at the time of the call.
        state: state::MachineState,
        /// Refused operation.
        operation: &'static str,
    },
    /// Bring-up aborted; the machine is left `Off`.
    #[error("machine {machine_id} failed to initialize at {stage}: {reason}")]
    InitializationFailed {
        /// Machine addressed.
        machine_id: u32,
        /// Manager or transport step that failed.
        stage: String,
        /// Underlying failure.
        reason: String,
    },
    /// Shutdown finished but some steps failed. The machine is `Off`.
    #[error("{0}")]
    ShutdownPartialFailure(ShutdownReport),
    /// The transport refused an event.
    #[error("machine {machine_id} failed to publish {event}: {source}")]
    PublishFailed {
        /// Machine addressed.
        machine_id: u32,
        /// Event or message that was dropped.
        event: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
    /// A beverage request was refused.
    #[error("machine {machine_id} refused request ({reason}): {detail}")]
    DispenseRejected {
        /// Machine addressed.
        machine_id: u32,
        /// Published error code.
        reason: DispenseRejection,
        /// Human-readable detail.
        detail: String,
    },
    /// A manager rejected the operation.
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    /// The transport refused a connect, disconnect or subscribe.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Inbound topic could not be decoded.
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// No machine with this id is registered.
    #[error("unknown machine {0}")]
    UnknownMachine(u32),
    /// Inbound topic suffix is not a known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// Inbound payload could not be parsed for the command.
    #[error("invalid payload for '{command}': {reason}")]
    InvalidPayload {
        /// Command addressed.
        command: String,
        /// Parse failure.
        reason: String,
    },
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use command::{Command, CommandReply};
pub use fleet::{Fleet, FleetShutdownSummary};
pub use monitor::{Alert, AlertKind, FleetMonitor, MaintenanceNotice, MonitoredStatus, Severity};
pub use orchestrator::{
    DispenseReceipt, MachineOrchestrator, MaintenanceReport, OrchestratorBuilder, RefillReport,
    RestartOutcome, StatusReport,
};
pub use publisher::EventPublisher;
pub use state::MachineState;
pub use timer::{RecordingTimer, SettleTimer, TokioTimer};
