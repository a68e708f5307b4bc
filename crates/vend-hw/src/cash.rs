//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Coin acceptance, customer credit and cash box accounting."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! All amounts are integer cents. The cash box capacity bounds the sum of
//! collected cash and outstanding customer credit.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use vend_common::MachineConfig;

use crate::driver::HardwareDriver;
use crate::power::{ManagerKind, PowerControllable, PowerState, PowerSwitch};
use crate::{HardwareError, Result};

/// Cash box occupancy above this fraction raises a near-full warning (80 %).
const NEAR_FULL_NUMERATOR: u64 = 8;
const NEAR_FULL_DENOMINATOR: u64 = 10;

/// Outcome of a settled payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    /// Amount moved from credit into the cash box.
    pub price_cents: u64,
    /// Credit left for the customer.
    pub remaining_credit_cents: u64,
    /// Cash box balance after the payment.
    pub balance_cents: u64,
    /// Whether the cash box is now above the warning threshold.
    pub near_full: bool,
}

/// Serializable view of the cash subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashSnapshot {
    /// Power state.
    pub power: PowerState,
    /// Whether coins are currently accepted.
    pub accepting_coins: bool,
    /// Outstanding customer credit.
    pub credit_cents: u64,
    /// Collected cash.
    pub balance_cents: u64,
    /// Cash box capacity.
    pub capacity_cents: u64,
    /// Balance as a percentage of capacity.
    pub occupancy_percent: f64,
}

/// Cash manager.
#[derive(Debug)]
pub struct CashManager {
    switch: PowerSwitch,
    machine_id: u32,
    accepting_coins: bool,
    credit_cents: u64,
    balance_cents: u64,
    capacity_cents: u64,
}

impl CashManager {
    /// Build a powered-off manager from the machine configuration.
    pub fn new(config: &MachineConfig, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            switch: PowerSwitch::new(config.id, ManagerKind::Cash, driver),
            machine_id: config.id,
            accepting_coins: false,
            credit_cents: 0,
            balance_cents: config.cash_balance_cents.min(config.cash_capacity_cents),
            capacity_cents: config.cash_capacity_cents,
        }
    }

    /// Whether `amount_cents` fits next to the current cash and credit.
    pub fn can_accept(&self, amount_cents: u64) -> bool {
        self.balance_cents
            .saturating_add(self.credit_cents)
            .saturating_add(amount_cents)
            <= self.capacity_cents
    }

    /// Add a coin to the customer's credit and return the new credit.
    pub fn accept_coin(&mut self, amount_cents: u64) -> Result<u64> {
        self.switch.ensure_on()?;
        if amount_cents == 0 {
            return Err(HardwareError::InvalidAmount { amount_cents });
        }
        if !self.can_accept(amount_cents) {
            warn!(
                machine_id = self.machine_id,
                amount_cents,
                balance_cents = self.balance_cents,
                credit_cents = self.credit_cents,
                "coin rejected: cash box full"
            );
            return Err(HardwareError::CapacityExceeded {
                capacity_cents: self.capacity_cents,
                requested_cents: self
                    .balance_cents
                    .saturating_add(self.credit_cents)
                    .saturating_add(amount_cents),
            });
        }
        self.credit_cents += amount_cents;
        info!(machine_id = self.machine_id, credit_cents = self.credit_cents, "credit updated");
        Ok(self.credit_cents)
    }

    /// Whether the current credit covers `price_cents`.
    pub fn has_credit_for(&self, price_cents: u64) -> Result<bool> {
        self.switch.ensure_on()?;
        Ok(self.credit_cents >= price_cents)
    }

    /// Move `price_cents` from credit into the cash box.
    pub fn charge(&mut self, price_cents: u64) -> Result<PaymentReceipt> {
        self.switch.ensure_on()?;
        if price_cents == 0 {
            return Err(HardwareError::InvalidAmount {
                amount_cents: price_cents,
            });
        }
        if self.credit_cents < price_cents {
            return Err(HardwareError::InsufficientCredit {
                required_cents: price_cents,
                available_cents: self.credit_cents,
            });
        }
        self.credit_cents -= price_cents;
        self.balance_cents += price_cents;
        let receipt = PaymentReceipt {
            price_cents,
            remaining_credit_cents: self.credit_cents,
            balance_cents: self.balance_cents,
            near_full: self.is_near_full(),
        };
        info!(
            machine_id = self.machine_id,
            price_cents,
            balance_cents = self.balance_cents,
            "payment processed"
        );
        Ok(receipt)
    }

    /// Hand back all outstanding credit and return the amount.
    pub fn return_credit(&mut self) -> Result<u64> {
        self.switch.ensure_on()?;
        Ok(self.refund())
    }

    /// Empty the cash box and return what was collected.
    pub fn empty_cash_box(&mut self) -> Result<u64> {
        self.switch.ensure_on()?;
        let collected = std::mem::take(&mut self.balance_cents);
        info!(machine_id = self.machine_id, collected_cents = collected, "cash box emptied");
        Ok(collected)
    }

    /// Overwrite the cash box balance; returns whether it is near full.
    pub fn set_balance(&mut self, balance_cents: u64) -> Result<bool> {
        self.switch.ensure_on()?;
        if balance_cents > self.capacity_cents {
            return Err(HardwareError::CapacityExceeded {
                capacity_cents: self.capacity_cents,
                requested_cents: balance_cents,
            });
        }
        self.balance_cents = balance_cents;
        Ok(self.is_near_full())
    }

    /// Balance strictly above 80 % of capacity.
    pub fn is_near_full(&self) -> bool {
        self.balance_cents * NEAR_FULL_DENOMINATOR > self.capacity_cents * NEAR_FULL_NUMERATOR
    }

    /// Outstanding customer credit.
    pub fn credit_cents(&self) -> u64 {
        self.credit_cents
    }

    /// Collected cash.
    pub fn balance_cents(&self) -> u64 {
        self.balance_cents
    }

    /// Cash box capacity.
    pub fn capacity_cents(&self) -> u64 {
        self.capacity_cents
    }

    /// Whether coins are accepted right now.
    pub fn accepting_coins(&self) -> bool {
        self.accepting_coins
    }

    /// Inspection is allowed in any power state.
    pub fn snapshot(&self) -> CashSnapshot {
        CashSnapshot {
            power: self.switch.state(),
            accepting_coins: self.accepting_coins,
            credit_cents: self.credit_cents,
            balance_cents: self.balance_cents,
            capacity_cents: self.capacity_cents,
            occupancy_percent: if self.capacity_cents == 0 {
                0.0
            } else {
                self.balance_cents as f64 * 100.0 / self.capacity_cents as f64
            },
        }
    }

    fn refund(&mut self) -> u64 {
        let refunded = std::mem::take(&mut self.credit_cents);
        if refunded > 0 {
            info!(machine_id = self.machine_id, refunded_cents = refunded, "credit returned");
        }
        refunded
    }
}

impl PowerControllable for CashManager {
    fn kind(&self) -> ManagerKind {
        self.switch.kind()
    }

    fn power_state(&self) -> PowerState {
        self.switch.state()
    }

    fn power_on(&mut self) -> Result<()> {
        if self.switch.switch_on()? {
            self.credit_cents = 0;
            self.accepting_coins = true;
        }
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        if !self.switch.is_on() {
            return Ok(());
        }
        self.accepting_coins = false;
        self.refund();
        self.switch.switch_off()?;
        Ok(())
    }
}
