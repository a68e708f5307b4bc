//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Machine lifecycle states."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineState {
    /// Managers are being powered on and the transport connected.
    Initializing,
    /// Fully up; the only state that accepts subsystem operations.
    Running,
    /// Managers are being powered off.
    ShuttingDown,
    /// Everything is down.
    Off,
    /// Waiting out the settle delay between shutdown and bring-up.
    Restarting,
}

impl MachineState {
    /// Wire and log name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Initializing => "initializing",
            MachineState::Running => "running",
            MachineState::ShuttingDown => "shutting-down",
            MachineState::Off => "off",
            MachineState::Restarting => "restarting",
        }
    }

    /// Whether subsystem operations are accepted.
    pub fn accepts_operations(&self) -> bool {
        matches!(self, MachineState::Running)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_accepts_operations() {
        let accepting: Vec<_> = [
            MachineState::Initializing,
            MachineState::Running,
            MachineState::ShuttingDown,
            MachineState::Off,
            MachineState::Restarting,
        ]
        .into_iter()
        .filter(MachineState::accepts_operations)
        .collect();
        assert_eq!(accepting, vec![MachineState::Running]);
        assert_eq!(MachineState::ShuttingDown.to_string(), "shutting-down");
    }
}
