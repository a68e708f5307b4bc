//! ---
//! vend_section: "04-hardware"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Maintenance issue tracking and maintenance mode."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;
use vend_common::MachineConfig;

use crate::driver::HardwareDriver;
use crate::power::{ManagerKind, PowerControllable, PowerState, PowerSwitch};
use crate::{HardwareError, Result};

/// An open problem reported against the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceIssue {
    /// Identifier assigned on report.
    pub id: u64,
    /// Category, e.g. `cash-box-full` or `jam`.
    pub category: String,
    /// Free text.
    pub description: String,
    /// When the issue was reported.
    pub reported_at: DateTime<Utc>,
}

/// Serializable view of the maintenance subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceSnapshot {
    /// Power state.
    pub power: PowerState,
    /// Whether a technician has the machine in maintenance mode.
    pub maintenance_mode: bool,
    /// Open issues, oldest first.
    pub open_issues: Vec<MaintenanceIssue>,
}

/// Maintenance manager.
#[derive(Debug)]
pub struct MaintenanceManager {
    switch: PowerSwitch,
    machine_id: u32,
    maintenance_mode: bool,
    issues: IndexMap<u64, MaintenanceIssue>,
    next_issue_id: u64,
}

impl MaintenanceManager {
    /// Build a powered-off manager.
    pub fn new(config: &MachineConfig, driver: Arc<dyn HardwareDriver>) -> Self {
        Self {
            switch: PowerSwitch::new(config.id, ManagerKind::Maintenance, driver),
            machine_id: config.id,
            maintenance_mode: false,
            issues: IndexMap::new(),
            next_issue_id: 1,
        }
    }

    /// Record a new issue and return its id.
    pub fn report_issue(
        &mut self,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<u64> {
        self.switch.ensure_on()?;
        let id = self.next_issue_id;
        self.next_issue_id += 1;
        let issue = MaintenanceIssue {
            id,
            category: category.into(),
            description: description.into(),
            reported_at: Utc::now(),
        };
        info!(
            machine_id = self.machine_id,
            issue = id,
            category = %issue.category,
            "maintenance issue reported"
        );
        self.issues.insert(id, issue);
        Ok(id)
    }

    /// Record an issue unless one with the same category is still open.
    /// Returns the new id, or `None` when an open issue already covers it.
    pub fn report_unless_open(
        &mut self,
        category: &str,
        description: impl Into<String>,
    ) -> Result<Option<u64>> {
        self.switch.ensure_on()?;
        if self.open_issue(category).is_some() {
            return Ok(None);
        }
        self.report_issue(category, description).map(Some)
    }

    /// The open issue filed under `category`, if any.
    pub fn open_issue(&self, category: &str) -> Option<&MaintenanceIssue> {
        self.issues.values().find(|issue| issue.category == category)
    }

    /// Close an open issue.
    pub fn resolve_issue(&mut self, issue_id: u64, resolution: &str) -> Result<MaintenanceIssue> {
        self.switch.ensure_on()?;
        let issue = self
            .issues
            .shift_remove(&issue_id)
            .ok_or(HardwareError::UnknownIssue(issue_id))?;
        info!(
            machine_id = self.machine_id,
            issue = issue_id,
            resolution,
            "maintenance issue resolved"
        );
        Ok(issue)
    }

    /// Put the machine in maintenance mode.
    pub fn enter_maintenance(&mut self) -> Result<()> {
        self.switch.ensure_on()?;
        self.maintenance_mode = true;
        Ok(())
    }

    /// Leave maintenance mode.
    pub fn exit_maintenance(&mut self) -> Result<()> {
        self.switch.ensure_on()?;
        self.maintenance_mode = false;
        Ok(())
    }

    /// Whether a technician is needed: any open issue.
    pub fn requires_intervention(&self) -> Result<bool> {
        self.switch.ensure_on()?;
        Ok(!self.issues.is_empty())
    }

    /// Whether maintenance mode is active.
    pub fn in_maintenance(&self) -> bool {
        self.maintenance_mode
    }

    /// Open issues, oldest first.
    pub fn open_issues(&self) -> Vec<MaintenanceIssue> {
        self.issues.values().cloned().collect()
    }

    /// Carry issues over to a rebuilt manager.
    pub fn adopt_issues(&mut self, issues: Vec<MaintenanceIssue>) {
        for issue in issues {
            self.next_issue_id = self.next_issue_id.max(issue.id + 1);
            self.issues.insert(issue.id, issue);
        }
    }

    /// Inspection is allowed in any power state.
    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            power: self.switch.state(),
            maintenance_mode: self.maintenance_mode,
            open_issues: self.open_issues(),
        }
    }
}

impl PowerControllable for MaintenanceManager {
    fn kind(&self) -> ManagerKind {
        self.switch.kind()
    }

    fn power_state(&self) -> PowerState {
        self.switch.state()
    }

    fn power_on(&mut self) -> Result<()> {
        if self.switch.switch_on()? {
            self.maintenance_mode = false;
        }
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        if !self.switch.is_on() {
            return Ok(());
        }
        self.maintenance_mode = false;
        self.switch.switch_off()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    fn manager() -> MaintenanceManager {
        let mut manager =
            MaintenanceManager::new(&MachineConfig::new(9, 1, 100), Arc::new(SimulatedDriver));
        manager.power_on().unwrap();
        manager
    }

    #[test]
    fn report_and_resolve_issues() {
        let mut manager = manager();
        assert!(!manager.requires_intervention().unwrap());
        let first = manager.report_issue("jam", "cup dispenser jammed").unwrap();
        let second = manager.report_issue("leak", "water on floor").unwrap();
        assert_ne!(first, second);
        assert!(manager.requires_intervention().unwrap());

        let resolved = manager.resolve_issue(first, "cleared").unwrap();
        assert_eq!(resolved.category, "jam");
        assert_eq!(manager.open_issues().len(), 1);
        assert_eq!(
            manager.resolve_issue(first, "again"),
            Err(HardwareError::UnknownIssue(first))
        );
    }

    #[test]
    fn duplicate_categories_are_not_reopened() {
        let mut manager = manager();
        let first = manager
            .report_unless_open("cash-box-full", "balance 900 of 1000")
            .unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(
            manager
                .report_unless_open("cash-box-full", "balance 950 of 1000")
                .unwrap(),
            None
        );
        assert_eq!(manager.open_issues().len(), 1);

        manager.resolve_issue(1, "emptied").unwrap();
        assert_eq!(
            manager
                .report_unless_open("cash-box-full", "balance 990 of 1000")
                .unwrap(),
            Some(2)
        );
    }

    #[test]
    fn maintenance_mode_resets_on_power_cycle() {
        let mut manager = manager();
        manager.enter_maintenance().unwrap();
        assert!(manager.in_maintenance());
        manager.power_off().unwrap();
        manager.power_on().unwrap();
        assert!(!manager.in_maintenance());
    }

    #[test]
    fn adopted_issues_keep_ids_unique() {
        let mut original = manager();
        original.report_issue("jam", "a").unwrap();
        original.report_issue("jam", "b").unwrap();

        let mut rebuilt = manager();
        rebuilt.adopt_issues(original.open_issues());
        let next = rebuilt.report_issue("leak", "c").unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn offline_rejects_reports() {
        let mut manager = manager();
        manager.power_off().unwrap();
        assert_eq!(
            manager.report_issue("jam", "x"),
            Err(HardwareError::ManagerOffline {
                kind: ManagerKind::Maintenance
            })
        );
    }
}
