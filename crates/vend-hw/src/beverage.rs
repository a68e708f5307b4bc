//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Beverage catalog and dispenser state."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};
use vend_common::{BeverageConfig, MachineConfig};

use crate::driver::HardwareDriver;
use crate::power::{ManagerKind, PowerControllable, PowerState, PowerSwitch};
use crate::{HardwareError, Result};

/// A beverage the machine can prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Beverage {
    /// Catalog id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Price in cents.
    pub price_cents: u64,
    /// Cartridge ids consumed per cup; repeats count.
    pub recipe: Vec<u32>,
}

impl From<&BeverageConfig> for Beverage {
    fn from(config: &BeverageConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            price_cents: config.price_cents,
            recipe: config.recipe.clone(),
        }
    }
}

/// Serializable view of the beverage subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeverageSnapshot {
    /// Power state.
    pub power: PowerState,
    /// Beverage currently being prepared, if any.
    pub dispensing: Option<u32>,
    /// Catalog in configuration order.
    pub catalog: Vec<Beverage>,
}

/// Beverage manager.
#[derive(Debug)]
pub struct BeverageManager {
    switch: PowerSwitch,
    machine_id: u32,
    catalog: IndexMap<u32, Beverage>,
    dispensing: Option<u32>,
}

impl BeverageManager {
    /// Build a powered-off manager from the machine configuration.
    pub fn new(config: &MachineConfig, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            switch: PowerSwitch::new(config.id, ManagerKind::Beverage, driver),
            machine_id: config.id,
            catalog: config
                .beverages
                .iter()
                .map(|beverage| (beverage.id, Beverage::from(beverage)))
                .collect(),
            dispensing: None,
        }
    }

    /// Look up a beverage.
    pub fn beverage(&self, beverage_id: u32) -> Result<&Beverage> {
        self.switch.ensure_on()?;
        self.catalog
            .get(&beverage_id)
            .ok_or(HardwareError::UnknownBeverage(beverage_id))
    }

    /// Beverages on offer.
    pub fn catalog(&self) -> Result<Vec<&Beverage>> {
        self.switch.ensure_on()?;
        Ok(self.catalog.values().collect())
    }

    /// Add or replace a catalog entry.
    pub fn upsert(&mut self, beverage: Beverage) -> Result<()> {
        self.switch.ensure_on()?;
        self.catalog.insert(beverage.id, beverage);
        Ok(())
    }

    /// Claim the dispenser for `beverage_id`.
    pub fn begin_dispense(&mut self, beverage_id: u32) -> Result<Beverage> {
        self.switch.ensure_on()?;
        if self.dispensing.is_some() {
            return Err(HardwareError::DispenseInProgress);
        }
        let beverage = self
            .catalog
            .get(&beverage_id)
            .cloned()
            .ok_or(HardwareError::UnknownBeverage(beverage_id))?;
        self.dispensing = Some(beverage_id);
        info!(machine_id = self.machine_id, beverage = %beverage.name, "dispense started");
        Ok(beverage)
    }

    /// Release the dispenser after a completed or abandoned dispense.
    pub fn end_dispense(&mut self) -> Result<()> {
        self.switch.ensure_on()?;
        self.dispensing = None;
        Ok(())
    }

    /// Beverage being prepared.
    pub fn dispensing(&self) -> Option<u32> {
        self.dispensing
    }

    /// Inspection is allowed in any power state.
    pub fn snapshot(&self) -> BeverageSnapshot {
        BeverageSnapshot {
            power: self.switch.state(),
            dispensing: self.dispensing,
            catalog: self.catalog.values().cloned().collect(),
        }
    }

    /// Catalog as configuration, used when rebuilding a machine.
    pub fn to_config(&self) -> Vec<BeverageConfig> {
        self.catalog
            .values()
            .map(|beverage| BeverageConfig {
                id: beverage.id,
                name: beverage.name.clone(),
                price_cents: beverage.price_cents,
                recipe: beverage.recipe.clone(),
            })
            .collect()
    }
}

impl PowerControllable for BeverageManager {
    fn kind(&self) -> ManagerKind {
        self.switch.kind()
    }

    fn power_state(&self) -> PowerState {
        self.switch.state()
    }

    fn power_on(&mut self) -> Result<()> {
        if self.switch.switch_on()? {
            self.dispensing = None;
        }
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        if !self.switch.is_on() {
            return Ok(());
        }
        if let Some(beverage_id) = self.dispensing.take() {
            warn!(machine_id = self.machine_id, beverage_id, "dispense interrupted by power off");
        }
        self.switch.switch_off()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    fn config() -> MachineConfig {
        let mut config = MachineConfig::new(5, 1, 10_000);
        config.beverages = vec![
            BeverageConfig {
                id: 1,
                name: "espresso".into(),
                price_cents: 80,
                recipe: vec![10],
            },
            BeverageConfig {
                id: 2,
                name: "cappuccino".into(),
                price_cents: 120,
                recipe: vec![10, 11],
            },
        ];
        config
    }

    fn manager() -> BeverageManager {
        let mut manager = BeverageManager::new(&config(), Arc::new(SimulatedDriver));
        manager.power_on().unwrap();
        manager
    }

    #[test]
    fn looks_up_catalog_entries() {
        let manager = manager();
        assert_eq!(manager.beverage(2).unwrap().name, "cappuccino");
        assert_eq!(manager.beverage(9), Err(HardwareError::UnknownBeverage(9)));
        let names: Vec<_> = manager.catalog().unwrap().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["espresso", "cappuccino"]);
    }

    #[test]
    fn only_one_dispense_at_a_time() {
        let mut manager = manager();
        manager.begin_dispense(1).unwrap();
        assert_eq!(manager.begin_dispense(2), Err(HardwareError::DispenseInProgress));
        manager.end_dispense().unwrap();
        assert!(manager.begin_dispense(2).is_ok());
    }

    #[test]
    fn power_off_stops_dispensing() {
        let mut manager = manager();
        manager.begin_dispense(1).unwrap();
        manager.power_off().unwrap();
        assert_eq!(manager.dispensing(), None);
        assert_eq!(
            manager.begin_dispense(1),
            Err(HardwareError::ManagerOffline {
                kind: ManagerKind::Beverage
            })
        );
        manager.power_on().unwrap();
        assert!(manager.begin_dispense(1).is_ok());
    }

    #[test]
    fn upsert_replaces_price() {
        let mut manager = manager();
        manager
            .upsert(Beverage {
                id: 1,
                name: "espresso".into(),
                price_cents: 90,
                recipe: vec![10],
            })
            .unwrap();
        assert_eq!(manager.to_config()[0].price_cents, 90);
    }
}
