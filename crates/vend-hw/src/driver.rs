//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Hardware driver seam with simulated and recording implementations."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::power::ManagerKind;

/// Failure reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverFault(pub String);

/// Low-level power control for the physical subsystems of a machine.
pub trait HardwareDriver: Send + Sync + fmt::Debug {
    /// Energise `kind` on `machine_id`.
    fn power_up(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault>;
    /// Cut power to `kind` on `machine_id`.
    fn power_down(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault>;
}

/// Driver that always succeeds. Used when no physical hardware is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedDriver;

impl HardwareDriver for SimulatedDriver {
    fn power_up(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault> {
        debug!(machine_id, manager = %kind, "simulated power up");
        Ok(())
    }

    fn power_down(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault> {
        debug!(machine_id, manager = %kind, "simulated power down");
        Ok(())
    }
}

/// Direction of a recorded power call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    /// `power_up`.
    Up,
    /// `power_down`.
    Down,
}

/// One call observed by [`RecordingDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCall {
    /// Machine addressed.
    pub machine_id: u32,
    /// Manager addressed.
    pub kind: ManagerKind,
    /// Requested transition.
    pub action: PowerAction,
    /// Whether the call was made to fail.
    pub failed: bool,
}

#[derive(Debug, Default)]
struct RecordingState {
    calls: Mutex<Vec<DriverCall>>,
    failing: Mutex<HashSet<(ManagerKind, PowerAction)>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
    latency: Mutex<Duration>,
}

/// Driver that records every call and fails on demand.
#[derive(Debug, Default, Clone)]
pub struct RecordingDriver {
    state: Arc<RecordingState>,
}

impl RecordingDriver {
    /// Create a driver where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append `power-up <kind>` / `power-down <kind>` to a shared journal.
    pub fn with_journal(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            state: Arc::new(RecordingState {
                journal: Some(journal),
                ..RecordingState::default()
            }),
        }
    }

    /// Make `power_up` for `kind` fail.
    pub fn fail_power_up(&self, kind: ManagerKind) {
        self.state.failing.lock().insert((kind, PowerAction::Up));
    }

    /// Make `power_down` for `kind` fail.
    pub fn fail_power_down(&self, kind: ManagerKind) {
        self.state.failing.lock().insert((kind, PowerAction::Down));
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.state.failing.lock().clear();
    }

    /// Block each call for `latency`, widening race windows in tests.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Calls observed so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.calls.lock().clone()
    }

    fn handle(
        &self,
        machine_id: u32,
        kind: ManagerKind,
        action: PowerAction,
    ) -> Result<(), DriverFault> {
        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let failed = self.state.failing.lock().contains(&(kind, action));
        self.state.calls.lock().push(DriverCall {
            machine_id,
            kind,
            action,
            failed,
        });
        if let Some(journal) = &self.state.journal {
            let verb = match action {
                PowerAction::Up => "power-up",
                PowerAction::Down => "power-down",
            };
            journal.lock().push(format!("{verb} {kind}"));
        }
        if failed {
            Err(DriverFault(format!("injected {action:?} failure for {kind}")))
        } else {
            Ok(())
        }
    }
}

impl HardwareDriver for RecordingDriver {
    fn power_up(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault> {
        self.handle(machine_id, kind, PowerAction::Up)
    }

    fn power_down(&self, machine_id: u32, kind: ManagerKind) -> Result<(), DriverFault> {
        self.handle(machine_id, kind, PowerAction::Down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_and_injected_failures() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let driver = RecordingDriver::with_journal(Arc::clone(&journal));
        driver.fail_power_down(ManagerKind::Cash);

        driver.power_up(7, ManagerKind::Cash).unwrap();
        assert!(driver.power_down(7, ManagerKind::Cash).is_err());
        driver.power_down(7, ManagerKind::Beverage).unwrap();

        let calls = driver.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].failed);
        assert_eq!(calls[2].kind, ManagerKind::Beverage);
        assert_eq!(
            *journal.lock(),
            vec!["power-up cash", "power-down cash", "power-down beverage"]
        );

        driver.clear_failures();
        assert!(driver.power_down(7, ManagerKind::Cash).is_ok());
    }

    #[test]
    fn simulated_driver_always_succeeds() {
        for kind in ManagerKind::ORDER {
            assert!(SimulatedDriver.power_up(1, kind).is_ok());
            assert!(SimulatedDriver.power_down(1, kind).is_ok());
        }
    }
}
