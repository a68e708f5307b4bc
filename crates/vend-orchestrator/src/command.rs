//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Inbound command vocabulary."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Commands arrive with JSON payloads on
//! `<root>/<id>/commands/<name>` (lifecycle),
//! `<root>/<id>/operations/<name>` (customer operations), and
//! `<root>/<id>/cartridges/<name>`, `<root>/<id>/maintenance/<name>` and
//! `<root>/<id>/cash/<name>` (operator work on one manager).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use vend_hw::{CartridgeLevel, MaintenanceIssue};

use crate::orchestrator::{
    DispenseReceipt, MaintenanceReport, RefillReport, RestartOutcome, StatusReport,
};
use crate::{OrchestratorError, Result};

/// Suffix filters a machine subscribes to.
pub const COMMAND_FILTERS: [&str; 5] = [
    "commands/+",
    "operations/+",
    "cartridges/+",
    "maintenance/+",
    "cash/+",
];

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Shut the machine down.
    Shutdown,
    /// Shut down, settle, bring up again.
    Restart,
    /// Publish a status snapshot.
    Status,
    /// Add customer credit.
    InsertCredit {
        /// Coin value in cents.
        amount_cents: u64,
    },
    /// Prepare a beverage against the current credit.
    RequestBeverage {
        /// Catalog id.
        beverage_id: u32,
        /// Sugar dose requested by the customer.
        sugar_level: u8,
    },
    /// Hand back outstanding credit.
    ReturnCredit,
    /// Top up cartridges; an empty list fills every cartridge.
    RefillCartridges {
        /// (cartridge id, units) pairs.
        amounts: Vec<(u32, u32)>,
    },
    /// Publish the cartridge stock report.
    CartridgeStatus,
    /// Open a maintenance issue.
    ReportIssue {
        /// Issue category, e.g. `jam`.
        category: String,
        /// Free text.
        description: String,
    },
    /// Close a maintenance issue.
    ResolveIssue {
        /// Id assigned on report.
        issue_id: u64,
        /// What was done.
        resolution: String,
    },
    /// Put the machine in maintenance mode.
    EnterMaintenance,
    /// Lift maintenance mode.
    ExitMaintenance,
    /// Publish the maintenance report.
    MaintenanceStatus,
    /// Empty the cash box.
    EmptyCashBox,
}

#[derive(Deserialize)]
struct InsertCreditPayload {
    amount_cents: u64,
}

#[derive(Deserialize)]
struct RequestBeveragePayload {
    beverage_id: u32,
    #[serde(default)]
    sugar_level: u8,
}

#[derive(Deserialize)]
struct RefillAmount {
    cartridge_id: u32,
    amount: u32,
}

#[derive(Default, Deserialize)]
struct RefillPayload {
    #[serde(default)]
    cartridges: Vec<RefillAmount>,
}

#[derive(Deserialize)]
struct ReportIssuePayload {
    category: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct ResolveIssuePayload {
    issue_id: u64,
    #[serde(default)]
    resolution: String,
}

fn payload<T: DeserializeOwned>(command: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| OrchestratorError::InvalidPayload {
        command: command.to_owned(),
        reason: err.to_string(),
    })
}

fn optional_payload<T: DeserializeOwned + Default>(command: &str, bytes: &[u8]) -> Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        payload(command, bytes)
    }
}

impl Command {
    /// Parse a topic suffix (everything after the machine id) and payload.
    pub fn parse(suffix: &str, bytes: &[u8]) -> Result<Self> {
        match suffix {
            "commands/shutdown" => Ok(Command::Shutdown),
            "commands/restart" => Ok(Command::Restart),
            "commands/status" => Ok(Command::Status),
            "operations/insert-credit" => {
                let body: InsertCreditPayload = payload(suffix, bytes)?;
                Ok(Command::InsertCredit {
                    amount_cents: body.amount_cents,
                })
            }
            "operations/request-beverage" => {
                let body: RequestBeveragePayload = payload(suffix, bytes)?;
                Ok(Command::RequestBeverage {
                    beverage_id: body.beverage_id,
                    sugar_level: body.sugar_level,
                })
            }
            "operations/return-credit" => Ok(Command::ReturnCredit),
            "cartridges/refill" => {
                let body: RefillPayload = optional_payload(suffix, bytes)?;
                Ok(Command::RefillCartridges {
                    amounts: body
                        .cartridges
                        .into_iter()
                        .map(|refill| (refill.cartridge_id, refill.amount))
                        .collect(),
                })
            }
            "cartridges/status" => Ok(Command::CartridgeStatus),
            "maintenance/report" => {
                let body: ReportIssuePayload = payload(suffix, bytes)?;
                Ok(Command::ReportIssue {
                    category: body.category,
                    description: body.description,
                })
            }
            "maintenance/resolve" => {
                let body: ResolveIssuePayload = payload(suffix, bytes)?;
                Ok(Command::ResolveIssue {
                    issue_id: body.issue_id,
                    resolution: body.resolution,
                })
            }
            "maintenance/enter" => Ok(Command::EnterMaintenance),
            "maintenance/exit" => Ok(Command::ExitMaintenance),
            "maintenance/status" => Ok(Command::MaintenanceStatus),
            "cash/empty" => Ok(Command::EmptyCashBox),
            other => Err(OrchestratorError::UnknownCommand(other.to_owned())),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Shutdown => "shutdown",
            Command::Restart => "restart",
            Command::Status => "status",
            Command::InsertCredit { .. } => "insert-credit",
            Command::RequestBeverage { .. } => "request-beverage",
            Command::ReturnCredit => "return-credit",
            Command::RefillCartridges { .. } => "refill-cartridges",
            Command::CartridgeStatus => "cartridge-status",
            Command::ReportIssue { .. } => "report-issue",
            Command::ResolveIssue { .. } => "resolve-issue",
            Command::EnterMaintenance => "enter-maintenance",
            Command::ExitMaintenance => "exit-maintenance",
            Command::MaintenanceStatus => "maintenance-status",
            Command::EmptyCashBox => "empty-cash-box",
        }
    }
}

/// Result of a handled command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reply")]
pub enum CommandReply {
    /// Shutdown finished cleanly.
    ShutDown,
    /// Restart finished.
    Restarted {
        /// Whether the shutdown half was clean.
        outcome: RestartOutcome,
    },
    /// Status was published.
    Status {
        /// Published report.
        report: StatusReport,
    },
    /// Credit was accepted.
    Credit {
        /// Credit now held.
        credit_cents: u64,
    },
    /// Credit was handed back.
    Refunded {
        /// Amount returned.
        amount_cents: u64,
    },
    /// A beverage was delivered.
    Dispensed {
        /// Payment details.
        receipt: DispenseReceipt,
    },
    /// Cartridges were topped up.
    Refilled {
        /// Levels after the refill and ids that were not recognised.
        report: RefillReport,
    },
    /// The stock report was published.
    Stock {
        /// Levels in configuration order.
        levels: Vec<CartridgeLevel>,
    },
    /// A maintenance issue was opened.
    IssueReported {
        /// Assigned id.
        issue_id: u64,
    },
    /// A maintenance issue was closed.
    IssueResolved {
        /// The closed issue.
        issue: MaintenanceIssue,
    },
    /// Maintenance mode changed.
    MaintenanceMode {
        /// Whether maintenance mode is now active.
        active: bool,
    },
    /// The maintenance report was published.
    Maintenance {
        /// Published report.
        report: MaintenanceReport,
    },
    /// The cash box was emptied.
    CashCollected {
        /// Amount taken out.
        amount_cents: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands_ignoring_payload() {
        assert_eq!(Command::parse("commands/shutdown", b"").unwrap(), Command::Shutdown);
        assert_eq!(Command::parse("commands/restart", b"{}").unwrap(), Command::Restart);
        assert_eq!(Command::parse("commands/status", b"junk").unwrap(), Command::Status);
    }

    #[test]
    fn parses_operation_payloads() {
        assert_eq!(
            Command::parse("operations/insert-credit", br#"{"amount_cents": 50}"#).unwrap(),
            Command::InsertCredit { amount_cents: 50 }
        );
        assert_eq!(
            Command::parse("operations/request-beverage", br#"{"beverage_id": 3}"#).unwrap(),
            Command::RequestBeverage {
                beverage_id: 3,
                sugar_level: 0
            }
        );
        assert_eq!(
            Command::parse("operations/return-credit", b"").unwrap(),
            Command::ReturnCredit
        );
    }

    #[test]
    fn parses_manager_commands() {
        assert_eq!(
            Command::parse(
                "cartridges/refill",
                br#"{"cartridges": [{"cartridge_id": 1, "amount": 10}]}"#
            )
            .unwrap(),
            Command::RefillCartridges {
                amounts: vec![(1, 10)]
            }
        );
        assert_eq!(
            Command::parse("cartridges/refill", b"").unwrap(),
            Command::RefillCartridges { amounts: vec![] }
        );
        assert_eq!(
            Command::parse("maintenance/report", br#"{"category": "jam"}"#).unwrap(),
            Command::ReportIssue {
                category: "jam".into(),
                description: String::new()
            }
        );
        assert_eq!(
            Command::parse("maintenance/resolve", br#"{"issue_id": 4, "resolution": "fixed"}"#)
                .unwrap(),
            Command::ResolveIssue {
                issue_id: 4,
                resolution: "fixed".into()
            }
        );
        assert_eq!(
            Command::parse("maintenance/enter", b"").unwrap(),
            Command::EnterMaintenance
        );
        assert_eq!(Command::parse("cash/empty", b"").unwrap(), Command::EmptyCashBox);
        assert!(matches!(
            Command::parse("maintenance/resolve", b"{}"),
            Err(OrchestratorError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn every_command_group_has_a_filter() {
        for suffix in ["commands/status", "cartridges/status", "maintenance/exit", "cash/empty"] {
            assert!(COMMAND_FILTERS
                .iter()
                .any(|filter| vend_msg::topic_matches(filter, suffix)));
        }
    }

    #[test]
    fn rejects_unknown_commands_and_bad_payloads() {
        assert!(matches!(
            Command::parse("commands/reboot", b""),
            Err(OrchestratorError::UnknownCommand(name)) if name == "commands/reboot"
        ));
        assert!(matches!(
            Command::parse("operations/insert-credit", br#"{"amount_cents": -5}"#),
            Err(OrchestratorError::InvalidPayload { command, .. })
                if command == "operations/insert-credit"
        ));
        assert!(matches!(
            Command::parse("operations/request-beverage", b""),
            Err(OrchestratorError::InvalidPayload { .. })
        ));
    }
}
