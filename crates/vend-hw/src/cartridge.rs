//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Wafer cartridge stock tracking."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};
use vend_common::{CartridgeConfig, MachineConfig};

use crate::driver::HardwareDriver;
use crate::power::{ManagerKind, PowerControllable, PowerState, PowerSwitch};
use crate::{HardwareError, Result};

/// Stock classification relative to capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus {
    /// Above 30 %.
    Ok,
    /// At or below 30 %.
    Low,
    /// At or below 10 %.
    RefillRequired,
}

impl StockStatus {
    /// Classify `quantity` against `capacity`.
    pub fn classify(quantity: u32, capacity: u32) -> Self {
        let (quantity, capacity) = (u64::from(quantity), u64::from(capacity));
        if quantity * 10 <= capacity {
            StockStatus::RefillRequired
        } else if quantity * 10 <= capacity * 3 {
            StockStatus::Low
        } else {
            StockStatus::Ok
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Ok => "ok",
            StockStatus::Low => "low",
            StockStatus::RefillRequired => "refill-required",
        }
    }
}

/// Stock of one cartridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartridgeLevel {
    /// Cartridge id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Units in stock.
    pub quantity: u32,
    /// Maximum units.
    pub capacity: u32,
    /// Classification of `quantity`.
    pub status: StockStatus,
}

/// Serializable view of the cartridge subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartridgeSnapshot {
    /// Power state.
    pub power: PowerState,
    /// Levels in configuration order.
    pub cartridges: Vec<CartridgeLevel>,
}

#[derive(Debug, Clone)]
struct Stock {
    name: String,
    quantity: u32,
    capacity: u32,
}

/// Wafer cartridge manager.
#[derive(Debug)]
pub struct WaferCartridgeManager {
    switch: PowerSwitch,
    machine_id: u32,
    stock: IndexMap<u32, Stock>,
}

fn count_recipe(recipe: &[u32]) -> BTreeMap<u32, u32> {
    let mut needed = BTreeMap::new();
    for cartridge in recipe {
        *needed.entry(*cartridge).or_insert(0) += 1;
    }
    needed
}

impl WaferCartridgeManager {
    /// Build a powered-off manager from the machine configuration.
    pub fn new(config: &MachineConfig, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            switch: PowerSwitch::new(config.id, ManagerKind::WaferCartridge, driver),
            machine_id: config.id,
            stock: config
                .cartridges
                .iter()
                .map(|cartridge| {
                    (
                        cartridge.id,
                        Stock {
                            name: cartridge.name.clone(),
                            quantity: cartridge.quantity.min(cartridge.capacity),
                            capacity: cartridge.capacity,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Verify every cartridge of `recipe` is in stock, counting repeats.
    pub fn check_availability(&self, recipe: &[u32]) -> Result<()> {
        self.switch.ensure_on()?;
        if recipe.is_empty() {
            return Err(HardwareError::InsufficientCartridges { missing: Vec::new() });
        }
        let missing: Vec<u32> = count_recipe(recipe)
            .into_iter()
            .filter(|(id, needed)| {
                self.stock
                    .get(id)
                    .map_or(true, |stock| stock.quantity < *needed)
            })
            .map(|(id, _)| id)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            warn!(machine_id = self.machine_id, missing = ?missing, "cartridges short of stock");
            Err(HardwareError::InsufficientCartridges { missing })
        }
    }

    /// Consume the stock for `recipe`. Returns cartridges whose status got
    /// worse, so callers can raise a warning.
    pub fn consume(&mut self, recipe: &[u32]) -> Result<Vec<CartridgeLevel>> {
        self.check_availability(recipe)?;
        let mut degraded = Vec::new();
        for (id, needed) in count_recipe(recipe) {
            if let Some(stock) = self.stock.get_mut(&id) {
                let before = StockStatus::classify(stock.quantity, stock.capacity);
                stock.quantity -= needed;
                let after = StockStatus::classify(stock.quantity, stock.capacity);
                if after > before {
                    degraded.push(level(id, stock));
                }
            }
        }
        Ok(degraded)
    }

    /// Add `amounts` (cartridge id, units), clamped to capacity. Unknown ids
    /// are skipped and returned.
    pub fn refill(&mut self, amounts: &[(u32, u32)]) -> Result<Vec<u32>> {
        self.switch.ensure_on()?;
        let mut unknown = Vec::new();
        for (id, units) in amounts {
            match self.stock.get_mut(id) {
                Some(stock) => {
                    stock.quantity = stock.quantity.saturating_add(*units).min(stock.capacity);
                    info!(
                        machine_id = self.machine_id,
                        cartridge = id,
                        quantity = stock.quantity,
                        "cartridge refilled"
                    );
                }
                None => {
                    warn!(
                        machine_id = self.machine_id,
                        cartridge = id,
                        "refill for unknown cartridge"
                    );
                    unknown.push(*id);
                }
            }
        }
        Ok(unknown)
    }

    /// Fill every cartridge to capacity.
    pub fn refill_all(&mut self) -> Result<()> {
        self.switch.ensure_on()?;
        for stock in self.stock.values_mut() {
            stock.quantity = stock.capacity;
        }
        info!(machine_id = self.machine_id, "all cartridges refilled");
        Ok(())
    }

    /// Current levels in configuration order.
    pub fn stock_report(&self) -> Result<Vec<CartridgeLevel>> {
        self.switch.ensure_on()?;
        Ok(self.levels())
    }

    /// Inspection is allowed in any power state.
    pub fn snapshot(&self) -> CartridgeSnapshot {
        CartridgeSnapshot {
            power: self.switch.state(),
            cartridges: self.levels(),
        }
    }

    /// Current stock as configuration, used when rebuilding a machine.
    pub fn to_config(&self) -> Vec<CartridgeConfig> {
        self.stock
            .iter()
            .map(|(id, stock)| CartridgeConfig {
                id: *id,
                name: stock.name.clone(),
                quantity: stock.quantity,
                capacity: stock.capacity,
            })
            .collect()
    }

    fn levels(&self) -> Vec<CartridgeLevel> {
        self.stock.iter().map(|(id, stock)| level(*id, stock)).collect()
    }
}

fn level(id: u32, stock: &Stock) -> CartridgeLevel {
    CartridgeLevel {
        id,
        name: stock.name.clone(),
        quantity: stock.quantity,
        capacity: stock.capacity,
        status: StockStatus::classify(stock.quantity, stock.capacity),
    }
}

impl PowerControllable for WaferCartridgeManager {
    fn kind(&self) -> ManagerKind {
        self.switch.kind()
    }

    fn power_state(&self) -> PowerState {
        self.switch.state()
    }

    fn power_on(&mut self) -> Result<()> {
        self.switch.switch_on()?;
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        self.switch.switch_off()?;
        Ok(())
    }
}
