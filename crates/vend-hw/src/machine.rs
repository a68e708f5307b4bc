//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "A machine instance owning exactly one of each manager."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::Serialize;
use vend_common::MachineConfig;

use crate::beverage::{BeverageManager, BeverageSnapshot};
use crate::cartridge::{CartridgeSnapshot, WaferCartridgeManager};
use crate::cash::{CashManager, CashSnapshot};
use crate::driver::HardwareDriver;
use crate::maintenance::{MaintenanceManager, MaintenanceSnapshot};
use crate::power::{ManagerKind, PowerControllable, PowerState};

/// Point-in-time view of every manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    /// Machine id.
    pub machine_id: u32,
    /// Institute the machine belongs to.
    pub institute_id: u32,
    /// Cash subsystem.
    pub cash: CashSnapshot,
    /// Beverage subsystem.
    pub beverages: BeverageSnapshot,
    /// Cartridge subsystem.
    pub cartridges: CartridgeSnapshot,
    /// Maintenance subsystem.
    pub maintenance: MaintenanceSnapshot,
}

/// One vending machine. Every manager starts powered off.
#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    cash: CashManager,
    beverages: BeverageManager,
    cartridges: WaferCartridgeManager,
    maintenance: MaintenanceManager,
}

impl Machine {
    /// Build a machine from its configuration.
    pub fn new(config: MachineConfig, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            cash: CashManager::new(&config, Arc::clone(&driver)),
            beverages: BeverageManager::new(&config, Arc::clone(&driver)),
            cartridges: WaferCartridgeManager::new(&config, Arc::clone(&driver)),
            maintenance: MaintenanceManager::new(&config, driver),
            config,
        }
    }

    /// Machine id.
    pub fn id(&self) -> u32 {
        self.config.id
    }

    /// Institute id.
    pub fn institute_id(&self) -> u32 {
        self.config.institute_id
    }

    /// Configuration the machine was built from.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Manager of `kind` behind the power capability.
    pub fn manager(&self, kind: ManagerKind) -> &dyn PowerControllable {
        match kind {
            ManagerKind::Cash => &self.cash,
            ManagerKind::Beverage => &self.beverages,
            ManagerKind::WaferCartridge => &self.cartridges,
            ManagerKind::Maintenance => &self.maintenance,
        }
    }

    /// Mutable manager of `kind` behind the power capability.
    pub fn manager_mut(&mut self, kind: ManagerKind) -> &mut dyn PowerControllable {
        match kind {
            ManagerKind::Cash => &mut self.cash,
            ManagerKind::Beverage => &mut self.beverages,
            ManagerKind::WaferCartridge => &mut self.cartridges,
            ManagerKind::Maintenance => &mut self.maintenance,
        }
    }

    /// Power state of every manager in startup order.
    pub fn power_states(&self) -> Vec<(ManagerKind, PowerState)> {
        ManagerKind::ORDER
            .iter()
            .map(|kind| (*kind, self.manager(*kind).power_state()))
            .collect()
    }

    /// Whether every manager is on.
    pub fn all_on(&self) -> bool {
        ManagerKind::ORDER.iter().all(|kind| self.manager(*kind).is_on())
    }

    /// Whether every manager is off.
    pub fn all_off(&self) -> bool {
        ManagerKind::ORDER.iter().all(|kind| !self.manager(*kind).is_on())
    }

    /// Cash manager.
    pub fn cash(&self) -> &CashManager {
        &self.cash
    }

    /// Mutable cash manager.
    pub fn cash_mut(&mut self) -> &mut CashManager {
        &mut self.cash
    }

    /// Beverage manager.
    pub fn beverages(&self) -> &BeverageManager {
        &self.beverages
    }

    /// Mutable beverage manager.
    pub fn beverages_mut(&mut self) -> &mut BeverageManager {
        &mut self.beverages
    }

    /// Cartridge manager.
    pub fn cartridges(&self) -> &WaferCartridgeManager {
        &self.cartridges
    }

    /// Mutable cartridge manager.
    pub fn cartridges_mut(&mut self) -> &mut WaferCartridgeManager {
        &mut self.cartridges
    }

    /// Maintenance manager.
    pub fn maintenance(&self) -> &MaintenanceManager {
        &self.maintenance
    }

    /// Mutable maintenance manager.
    pub fn maintenance_mut(&mut self) -> &mut MaintenanceManager {
        &mut self.maintenance
    }

    /// Snapshot of every manager.
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            machine_id: self.id(),
            institute_id: self.institute_id(),
            cash: self.cash.snapshot(),
            beverages: self.beverages.snapshot(),
            cartridges: self.cartridges.snapshot(),
            maintenance: self.maintenance.snapshot(),
        }
    }

    /// Configuration reflecting the current cash balance, catalog and stock,
    /// for rebuilding an equivalent machine.
    pub fn current_config(&self) -> MachineConfig {
        MachineConfig {
            cash_balance_cents: self.cash.balance_cents(),
            beverages: self.beverages.to_config(),
            cartridges: self.cartridges.to_config(),
            ..self.config.clone()
        }
    }
}
