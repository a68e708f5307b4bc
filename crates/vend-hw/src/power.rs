//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Power capability shared by every hardware manager."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::HardwareDriver;
use crate::{HardwareError, Result};

/// The four subsystems of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    /// Coin acceptance, credit and cash box.
    Cash,
    /// Beverage catalog and dispensing.
    Beverage,
    /// Wafer cartridge stock.
    WaferCartridge,
    /// Issue tracking and maintenance mode.
    Maintenance,
}

impl ManagerKind {
    /// Startup and shutdown order.
    pub const ORDER: [ManagerKind; 4] = [
        ManagerKind::Cash,
        ManagerKind::Beverage,
        ManagerKind::WaferCartridge,
        ManagerKind::Maintenance,
    ];

    /// Stable lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerKind::Cash => "cash",
            ManagerKind::Beverage => "beverage",
            ManagerKind::WaferCartridge => "wafer-cartridge",
            ManagerKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power state of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    /// Accepting operations.
    On,
    /// Rejecting everything except `power_on`.
    Off,
}

/// Capability through which the orchestrator drives every manager.
///
/// Both transitions are idempotent: calling either in the matching state is
/// a successful no-op. `power_off` releases subsystem resources before the
/// driver cuts power; if the driver refuses, the manager stays `On` and the
/// error is returned.
pub trait PowerControllable: Send {
    /// Which subsystem this is.
    fn kind(&self) -> ManagerKind;
    /// Current power state.
    fn power_state(&self) -> PowerState;
    /// Off -> On, restoring the subsystem to a safe default.
    fn power_on(&mut self) -> Result<()>;
    /// On -> Off.
    fn power_off(&mut self) -> Result<()>;

    /// Convenience check for `PowerState::On`.
    fn is_on(&self) -> bool {
        self.power_state() == PowerState::On
    }
}

/// Power bookkeeping embedded in each manager.
#[derive(Debug)]
pub(crate) struct PowerSwitch {
    machine_id: u32,
    kind: ManagerKind,
    state: PowerState,
    driver: Arc<dyn HardwareDriver>,
}

impl PowerSwitch {
    pub(crate) fn new(machine_id: u32, kind: ManagerKind, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            machine_id,
            kind,
            state: PowerState::Off,
            driver,
        }
    }

    pub(crate) fn kind(&self) -> ManagerKind {
        self.kind
    }

    pub(crate) fn state(&self) -> PowerState {
        self.state
    }

    pub(crate) fn is_on(&self) -> bool {
        self.state == PowerState::On
    }

    pub(crate) fn ensure_on(&self) -> Result<()> {
        if self.is_on() {
            Ok(())
        } else {
            Err(HardwareError::ManagerOffline { kind: self.kind })
        }
    }

    /// Ask the driver for power. Returns `false` when already on.
    pub(crate) fn switch_on(&mut self) -> Result<bool> {
        if self.is_on() {
            return Ok(false);
        }
        self.driver
            .power_up(self.machine_id, self.kind)
            .map_err(|fault| HardwareError::Driver {
                kind: self.kind,
                reason: fault.to_string(),
            })?;
        self.state = PowerState::On;
        debug!(machine_id = self.machine_id, manager = %self.kind, "manager powered on");
        Ok(true)
    }

    /// Ask the driver to cut power. Returns `false` when already off.
    pub(crate) fn switch_off(&mut self) -> Result<bool> {
        if !self.is_on() {
            return Ok(false);
        }
        self.driver
            .power_down(self.machine_id, self.kind)
            .map_err(|fault| HardwareError::Driver {
                kind: self.kind,
                reason: fault.to_string(),
            })?;
        self.state = PowerState::Off;
        debug!(machine_id = self.machine_id, manager = %self.kind, "manager powered off");
        Ok(true)
    }
}
