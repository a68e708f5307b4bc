//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Hardware managers owned by a vending machine."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The four subsystems of a vending machine, each behind the
//! [`PowerControllable`] capability so the orchestrator can sequence them
//! uniformly in [`ManagerKind::ORDER`].

pub mod beverage;
pub mod cartridge;
pub mod cash;
pub mod driver;
pub mod machine;
pub mod maintenance;
pub mod power;

/// Shared result type for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors raised by hardware managers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    /// The manager is powered off; only `power_on` is accepted.
    #[error("{kind} manager is offline")]
    ManagerOffline {
        /// Manager that rejected the call.
        kind: ManagerKind,
    },
    /// The hardware driver refused a power transition.
    #[error("{kind} driver fault: {reason}")]
    Driver {
        /// Manager whose driver failed.
        kind: ManagerKind,
        /// Driver-supplied reason.
        reason: String,
    },
    /// Amounts must be strictly positive.
    #[error("invalid amount: {amount_cents} cents")]
    InvalidAmount {
        /// Rejected amount.
        amount_cents: u64,
    },
    /// Accepting the amount would overflow the cash box.
    #[error("cash box capacity of {capacity_cents} cents would be exceeded ({requested_cents} requested)")]
    CapacityExceeded {
        /// Cash box capacity.
        capacity_cents: u64,
        /// Total that would have been held.
        requested_cents: u64,
    },
    /// Credit does not cover the price.
    #[error("insufficient credit: {available_cents} of {required_cents} cents")]
    InsufficientCredit {
        /// Price.
        required_cents: u64,
        /// Credit held.
        available_cents: u64,
    },
    /// No beverage with this id in the catalog.
    #[error("unknown beverage {0}")]
    UnknownBeverage(u32),
    /// Stock for the recipe is missing.
    #[error("insufficient cartridges {missing:?} for beverage recipe")]
    InsufficientCartridges {
        /// Cartridge ids short of stock.
        missing: Vec<u32>,
    },
    /// A beverage is already being prepared.
    #[error("a dispense is already in progress")]
    DispenseInProgress,
    /// No open maintenance issue with this id.
    #[error("unknown maintenance issue {0}")]
    UnknownIssue(u64),
}

pub use beverage::{Beverage, BeverageManager, BeverageSnapshot};
pub use cartridge::{CartridgeLevel, CartridgeSnapshot, StockStatus, WaferCartridgeManager};
pub use cash::{CashManager, CashSnapshot, PaymentReceipt};
pub use driver::{
    DriverCall, DriverFault, HardwareDriver, PowerAction, RecordingDriver, SimulatedDriver,
};
pub use machine::{Machine, MachineSnapshot};
pub use maintenance::{MaintenanceIssue, MaintenanceManager, MaintenanceSnapshot};
pub use power::{ManagerKind, PowerControllable, PowerState};
