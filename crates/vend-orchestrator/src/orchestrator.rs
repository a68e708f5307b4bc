//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Per-machine lifecycle state machine and customer operations."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Every transition and every operation takes the machine lock for its whole
//! duration, settle and dispense delays included, so work on one machine is
//! strictly serialized while different machines proceed independently.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use vend_common::{LifecycleConfig, MachineConfig, RestartPolicy};
use vend_hw::{
    CartridgeLevel, HardwareDriver, HardwareError, Machine, MachineSnapshot, MaintenanceIssue,
    ManagerKind, SimulatedDriver, StockStatus,
};
use vend_logging::{log_system_event, vend_info, vend_warn, LogContext, SystemEventOutcome};
use vend_msg::{EventKind, MessagingMetricsExporter, MqttTransport, TopicCodec};

use crate::command::{Command, CommandReply, COMMAND_FILTERS};
use crate::publisher::{EventPublisher, STATUS_SUFFIX};
use crate::state::MachineState;
use crate::timer::{SettleTimer, TokioTimer};
use crate::{DispenseRejection, OrchestratorError, Result, ShutdownReport, ShutdownStep};

/// Topic root used when none is configured.
pub const DEFAULT_TOPIC_ROOT: &str = "vending";

/// Suffix of the published cartridge stock report.
pub const STOCK_SUFFIX: &str = "status/cartridges";

/// Suffix of the published maintenance report.
pub const MAINTENANCE_SUFFIX: &str = "status/maintenance";

/// Category of the issue opened when the cash box passes its threshold.
pub const CASH_BOX_FULL_ISSUE: &str = "cash-box-full";

/// Category of the issue opened when a cartridge needs a refill.
pub fn cartridge_refill_issue(cartridge: &str) -> String {
    format!("cartridge-refill:{cartridge}")
}

/// Status telemetry published under `<root>/<id>/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Machine id.
    pub machine_id: u32,
    /// Lifecycle state.
    pub state: MachineState,
    /// Time of the snapshot.
    pub timestamp: DateTime<Utc>,
    /// Every manager.
    pub snapshot: MachineSnapshot,
}

/// Outcome of a restart that brought the machine back up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartOutcome {
    /// Every shutdown step succeeded.
    Clean,
    /// Shutdown had failures; the machine was re-initialized anyway.
    Degraded(ShutdownReport),
}

/// A delivered beverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispenseReceipt {
    /// Catalog id.
    pub beverage_id: u32,
    /// Display name.
    pub name: String,
    /// Amount charged.
    pub price_cents: u64,
    /// Credit left for the customer.
    pub remaining_credit_cents: u64,
    /// Sugar dose delivered.
    pub sugar_level: u8,
}

/// Cartridge levels after a refill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefillReport {
    /// Levels in configuration order.
    pub levels: Vec<CartridgeLevel>,
    /// Requested cartridge ids the machine does not have.
    pub unknown: Vec<u32>,
}

/// Maintenance telemetry published under `<root>/<id>/status/maintenance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Whether a technician has the machine in maintenance mode.
    pub maintenance_mode: bool,
    /// Whether any issue is open.
    pub requires_intervention: bool,
    /// Open issues, oldest first.
    pub open_issues: Vec<MaintenanceIssue>,
}

/// Builder wiring a machine to its transport, driver and timer.
pub struct OrchestratorBuilder {
    config: MachineConfig,
    transport: Arc<dyn MqttTransport>,
    driver: Arc<dyn HardwareDriver>,
    timer: Arc<dyn SettleTimer>,
    lifecycle: LifecycleConfig,
    topic_root: String,
    metrics: Option<MessagingMetricsExporter>,
}

impl OrchestratorBuilder {
    /// Hardware driver shared by the four managers.
    pub fn driver(mut self, driver: Arc<dyn HardwareDriver>) -> Self {
        self.driver = driver;
        self
    }

    /// Timer used for the settle and dispense delays.
    pub fn timer(mut self, timer: Arc<dyn SettleTimer>) -> Self {
        self.timer = timer;
        self
    }

    /// Lifecycle settings.
    pub fn lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Topic root events are published under.
    pub fn topic_root(mut self, root: impl Into<String>) -> Self {
        self.topic_root = root.into();
        self
    }

    /// Metrics for publishes and transitions.
    pub fn metrics(mut self, metrics: MessagingMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build an orchestrator in state `Off`.
    pub fn build(self) -> MachineOrchestrator {
        let machine_id = self.config.id;
        let codec = TopicCodec::new(self.topic_root);
        let mut publisher =
            EventPublisher::new(machine_id, codec.clone(), Arc::clone(&self.transport));
        if let Some(metrics) = &self.metrics {
            publisher = publisher.with_metrics(metrics.clone());
        }
        let (state, _) = watch::channel(MachineState::Off);
        MachineOrchestrator {
            machine_id,
            machine: Mutex::new(Machine::new(self.config.clone(), Arc::clone(&self.driver))),
            state,
            factory: self.config,
            driver: self.driver,
            transport: self.transport,
            publisher,
            codec,
            timer: self.timer,
            lifecycle: self.lifecycle,
            metrics: self.metrics,
        }
    }
}

/// Lifecycle owner of one vending machine.
pub struct MachineOrchestrator {
    machine_id: u32,
    machine: Mutex<Machine>,
    state: watch::Sender<MachineState>,
    factory: MachineConfig,
    driver: Arc<dyn HardwareDriver>,
    transport: Arc<dyn MqttTransport>,
    publisher: EventPublisher,
    codec: TopicCodec,
    timer: Arc<dyn SettleTimer>,
    lifecycle: LifecycleConfig,
    metrics: Option<MessagingMetricsExporter>,
}

impl MachineOrchestrator {
    /// Start building an orchestrator for `config`.
    pub fn builder(
        config: MachineConfig,
        transport: Arc<dyn MqttTransport>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            transport,
            driver: Arc::new(SimulatedDriver),
            timer: Arc::new(TokioTimer),
            lifecycle: LifecycleConfig::default(),
            topic_root: DEFAULT_TOPIC_ROOT.to_owned(),
            metrics: None,
        }
    }

    /// Machine id.
    pub fn machine_id(&self) -> u32 {
        self.machine_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MachineState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<MachineState> {
        self.state.subscribe()
    }

    /// Transport the machine publishes and listens on.
    pub fn transport(&self) -> Arc<dyn MqttTransport> {
        Arc::clone(&self.transport)
    }

    /// Filters for the commands addressed to this machine.
    pub fn command_filters(&self) -> Vec<String> {
        COMMAND_FILTERS
            .iter()
            .map(|suffix| self.codec.machine_filter(self.machine_id, suffix))
            .collect()
    }

    /// Power every manager on in order and connect the transport.
    pub async fn initialize(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Off, "initialize")?;
        self.bring_up(&mut machine).await
    }

    /// Announce, power every manager off in order, disconnect. Every step is
    /// attempted; the machine always ends `Off`.
    pub async fn shutdown(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "shut down")?;
        let mut report = ShutdownReport::new(self.machine_id);
        self.tear_down(&mut machine, &mut report).await;
        if report.is_clean() {
            Ok(())
        } else {
            Err(OrchestratorError::ShutdownPartialFailure(report))
        }
    }

    /// Announce, shut down, wait the settle delay, then bring up a fresh
    /// machine instance. Shutdown failures do not prevent re-initialization.
    pub async fn restart(&self) -> Result<RestartOutcome> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "restart")?;

        let mut report = ShutdownReport::new(self.machine_id);
        if let Err(err) = self.publisher.publish(EventKind::Restart, "restart requested").await {
            report.record(ShutdownStep::Announce(EventKind::Restart), err);
        }
        self.tear_down(&mut machine, &mut report).await;

        self.transition(MachineState::Restarting);
        self.timer.sleep(self.lifecycle.settle_delay).await;

        *machine = self.rebuild(&machine);
        self.bring_up(&mut machine).await?;

        Ok(if report.is_clean() {
            RestartOutcome::Clean
        } else {
            RestartOutcome::Degraded(report)
        })
    }

    /// Snapshot of the machine in its current state.
    pub async fn status(&self) -> StatusReport {
        let machine = self.machine.lock().await;
        self.status_of(&machine)
    }

    /// Publish the status snapshot.
    pub async fn publish_status(&self) -> Result<StatusReport> {
        let machine = self.machine.lock().await;
        let report = self.status_of(&machine);
        self.publisher.publish_json(STATUS_SUFFIX, &report).await?;
        Ok(report)
    }

    /// Add customer credit.
    pub async fn insert_credit(&self, amount_cents: u64) -> Result<u64> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "accept credit")?;
        if machine.maintenance().in_maintenance() {
            return self
                .reject(DispenseRejection::InMaintenance, "coins are not accepted".to_owned())
                .await;
        }
        match machine.cash_mut().accept_coin(amount_cents) {
            Ok(credit) => {
                self.announce(
                    EventKind::CreditInserted,
                    format!("{amount_cents} cents inserted, credit {credit} cents"),
                )
                .await;
                Ok(credit)
            }
            Err(err) => {
                self.announce(EventKind::Error, format!("credit-rejected: {err}"))
                    .await;
                Err(err.into())
            }
        }
    }

    /// Hand back outstanding credit.
    pub async fn return_credit(&self) -> Result<u64> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "return credit")?;
        let refunded = machine.cash_mut().return_credit()?;
        self.announce(EventKind::CreditReturned, format!("{refunded} cents returned"))
            .await;
        Ok(refunded)
    }

    /// Prepare a beverage: verify catalog, stock and credit, dispense for the
    /// configured duration, consume stock, settle the payment.
    pub async fn request_beverage(
        &self,
        beverage_id: u32,
        sugar_level: u8,
    ) -> Result<DispenseReceipt> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "dispense")?;

        if machine.maintenance().in_maintenance() {
            return self
                .reject(DispenseRejection::InMaintenance, format!("beverage {beverage_id} refused"))
                .await;
        }
        if let Some(current) = machine.beverages().dispensing() {
            return self
                .reject(DispenseRejection::MachineBusy, format!("beverage {current} in progress"))
                .await;
        }
        let beverage = match machine.beverages().beverage(beverage_id) {
            Ok(beverage) => beverage.clone(),
            Err(err @ HardwareError::UnknownBeverage(_)) => {
                return self
                    .reject(DispenseRejection::BeverageUnavailable, err.to_string())
                    .await
            }
            Err(err) => return Err(err.into()),
        };
        match machine.cartridges().check_availability(&beverage.recipe) {
            Ok(()) => {}
            Err(err @ HardwareError::InsufficientCartridges { .. }) => {
                return self
                    .reject(DispenseRejection::InsufficientCartridges, err.to_string())
                    .await
            }
            Err(err) => return Err(err.into()),
        }
        if !machine.cash().has_credit_for(beverage.price_cents)? {
            let detail = format!(
                "{} requires {} cents, credit is {} cents",
                beverage.name,
                beverage.price_cents,
                machine.cash().credit_cents()
            );
            return self.reject(DispenseRejection::InsufficientCredit, detail).await;
        }

        match machine.beverages_mut().begin_dispense(beverage_id) {
            Ok(_) => {}
            Err(HardwareError::DispenseInProgress) => {
                return self
                    .reject(DispenseRejection::MachineBusy, "dispenser claimed".to_owned())
                    .await
            }
            Err(err) => return Err(err.into()),
        }
        self.announce(
            EventKind::DispenseStarted,
            format!("{} (sugar {sugar_level})", beverage.name),
        )
        .await;
        self.timer.sleep(self.lifecycle.dispense_duration).await;

        let settled = machine
            .cartridges_mut()
            .consume(&beverage.recipe)
            .and_then(|degraded| {
                machine
                    .cash_mut()
                    .charge(beverage.price_cents)
                    .map(|payment| (degraded, payment))
            });
        machine.beverages_mut().end_dispense()?;
        let (degraded, payment) = match settled {
            Ok(settled) => settled,
            Err(err) => {
                self.announce(EventKind::Error, format!("dispense-failed: {err}"))
                    .await;
                return Err(err.into());
            }
        };

        for level in degraded {
            let detail = format!("{} at {} of {}", level.name, level.quantity, level.capacity);
            self.announce(
                EventKind::Warning,
                format!("cartridge-{}: {detail}", level.status.as_str()),
            )
            .await;
            if level.status == StockStatus::RefillRequired {
                self.request_maintenance(&mut machine, &cartridge_refill_issue(&level.name), detail)
                    .await;
            }
        }
        if payment.near_full {
            let detail = format!(
                "{} of {} cents",
                payment.balance_cents,
                machine.cash().capacity_cents()
            );
            self.announce(EventKind::Warning, format!("cash-box-near-full: {detail}"))
                .await;
            self.request_maintenance(&mut machine, CASH_BOX_FULL_ISSUE, detail)
                .await;
        }
        self.announce(EventKind::DispenseCompleted, beverage.name.clone())
            .await;

        Ok(DispenseReceipt {
            beverage_id,
            name: beverage.name,
            price_cents: payment.price_cents,
            remaining_credit_cents: payment.remaining_credit_cents,
            sugar_level,
        })
    }

    /// Top up the listed cartridges, or all of them when `amounts` is empty.
    /// Refill issues for cartridges back above the refill threshold are closed.
    pub async fn refill_cartridges(&self, amounts: &[(u32, u32)]) -> Result<RefillReport> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "refill cartridges")?;
        let unknown = if amounts.is_empty() {
            machine.cartridges_mut().refill_all()?;
            Vec::new()
        } else {
            machine.cartridges_mut().refill(amounts)?
        };
        let levels = machine.cartridges().stock_report()?;
        for level in &levels {
            if level.status != StockStatus::RefillRequired {
                self.close_issue(&mut machine, &cartridge_refill_issue(&level.name), "refilled")
                    .await;
            }
        }
        let refilled = if amounts.is_empty() {
            levels.len()
        } else {
            amounts.len() - unknown.len()
        };
        self.announce(
            EventKind::CartridgesRefilled,
            format!("{refilled} cartridge(s) refilled"),
        )
        .await;
        Ok(RefillReport { levels, unknown })
    }

    /// Publish the cartridge stock report.
    pub async fn stock_report(&self) -> Result<Vec<CartridgeLevel>> {
        let machine = self.machine.lock().await;
        self.require(MachineState::Running, "report stock")?;
        let levels = machine.cartridges().stock_report()?;
        self.publisher.publish_json(STOCK_SUFFIX, &levels).await?;
        Ok(levels)
    }

    /// Open a maintenance issue and return its id.
    pub async fn report_issue(&self, category: &str, description: &str) -> Result<u64> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "report an issue")?;
        let issue = machine
            .maintenance_mut()
            .report_issue(category, description)?;
        self.announce(
            EventKind::MaintenanceRequested,
            format!("issue {issue} [{category}]: {description}"),
        )
        .await;
        Ok(issue)
    }

    /// Close a maintenance issue.
    pub async fn resolve_issue(&self, issue_id: u64, resolution: &str) -> Result<MaintenanceIssue> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "resolve an issue")?;
        let issue = machine
            .maintenance_mut()
            .resolve_issue(issue_id, resolution)?;
        self.announce(
            EventKind::IssueResolved,
            format!("issue {issue_id} [{}]: {resolution}", issue.category),
        )
        .await;
        Ok(issue)
    }

    /// Enter or leave maintenance mode. Customer operations are refused while
    /// it is active.
    pub async fn set_maintenance_mode(&self, active: bool) -> Result<bool> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "change maintenance mode")?;
        if active {
            machine.maintenance_mut().enter_maintenance()?;
            self.announce(EventKind::MaintenanceStarted, "maintenance mode entered")
                .await;
        } else {
            machine.maintenance_mut().exit_maintenance()?;
            self.announce(EventKind::MaintenanceEnded, "maintenance mode left")
                .await;
        }
        Ok(active)
    }

    /// Publish the maintenance report.
    pub async fn maintenance_report(&self) -> Result<MaintenanceReport> {
        let machine = self.machine.lock().await;
        self.require(MachineState::Running, "report maintenance")?;
        let maintenance = machine.maintenance();
        let report = MaintenanceReport {
            maintenance_mode: maintenance.in_maintenance(),
            requires_intervention: maintenance.requires_intervention()?,
            open_issues: maintenance.open_issues(),
        };
        self.publisher.publish_json(MAINTENANCE_SUFFIX, &report).await?;
        Ok(report)
    }

    /// Empty the cash box and close any open cash-box issue.
    pub async fn empty_cash_box(&self) -> Result<u64> {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, "empty the cash box")?;
        let collected = machine.cash_mut().empty_cash_box()?;
        self.close_issue(&mut machine, CASH_BOX_FULL_ISSUE, "cash box emptied")
            .await;
        self.announce(EventKind::CashBoxEmptied, format!("{collected} cents collected"))
            .await;
        Ok(collected)
    }

    /// Run a manager operation (refill, maintenance, cash box) while Running.
    pub async fn operate<F, R>(&self, operation: &'static str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Machine) -> std::result::Result<R, HardwareError> + Send,
    {
        let mut machine = self.machine.lock().await;
        self.require(MachineState::Running, operation)?;
        Ok(f(&mut machine)?)
    }

    /// Execute a decoded inbound command.
    pub async fn handle(&self, command: Command) -> Result<CommandReply> {
        match command {
            Command::Shutdown => self.shutdown().await.map(|()| CommandReply::ShutDown),
            Command::Restart => self
                .restart()
                .await
                .map(|outcome| CommandReply::Restarted { outcome }),
            Command::Status => self
                .publish_status()
                .await
                .map(|report| CommandReply::Status { report }),
            Command::InsertCredit { amount_cents } => self
                .insert_credit(amount_cents)
                .await
                .map(|credit_cents| CommandReply::Credit { credit_cents }),
            Command::RequestBeverage {
                beverage_id,
                sugar_level,
            } => self
                .request_beverage(beverage_id, sugar_level)
                .await
                .map(|receipt| CommandReply::Dispensed { receipt }),
            Command::ReturnCredit => self
                .return_credit()
                .await
                .map(|amount_cents| CommandReply::Refunded { amount_cents }),
            Command::RefillCartridges { amounts } => self
                .refill_cartridges(&amounts)
                .await
                .map(|report| CommandReply::Refilled { report }),
            Command::CartridgeStatus => self
                .stock_report()
                .await
                .map(|levels| CommandReply::Stock { levels }),
            Command::ReportIssue {
                category,
                description,
            } => self
                .report_issue(&category, &description)
                .await
                .map(|issue_id| CommandReply::IssueReported { issue_id }),
            Command::ResolveIssue {
                issue_id,
                resolution,
            } => self
                .resolve_issue(issue_id, &resolution)
                .await
                .map(|issue| CommandReply::IssueResolved { issue }),
            Command::EnterMaintenance => self
                .set_maintenance_mode(true)
                .await
                .map(|active| CommandReply::MaintenanceMode { active }),
            Command::ExitMaintenance => self
                .set_maintenance_mode(false)
                .await
                .map(|active| CommandReply::MaintenanceMode { active }),
            Command::MaintenanceStatus => self
                .maintenance_report()
                .await
                .map(|report| CommandReply::Maintenance { report }),
            Command::EmptyCashBox => self
                .empty_cash_box()
                .await
                .map(|amount_cents| CommandReply::CashCollected { amount_cents }),
        }
    }

    async fn bring_up(&self, machine: &mut Machine) -> Result<()> {
        self.transition(MachineState::Initializing);
        let mut powered = Vec::with_capacity(ManagerKind::ORDER.len());
        for kind in ManagerKind::ORDER {
            if let Err(err) = machine.manager_mut(kind).power_on() {
                self.roll_back(machine, &powered);
                return Err(self.initialization_failed(kind.as_str(), err));
            }
            powered.push(kind);
        }
        if let Err(err) = self.transport.connect().await {
            self.roll_back(machine, &powered);
            return Err(self.initialization_failed("transport", err));
        }

        self.transition(MachineState::Running);
        let ctx = LogContext::new()
            .with_machine(self.machine_id)
            .with_state(MachineState::Running.as_str());
        log_system_event(
            Some(&ctx),
            "initialize",
            "machine initialized",
            SystemEventOutcome::Success,
        );
        self.announce(EventKind::Initialized, "machine initialized")
            .await;
        let report = self.status_of(machine);
        if let Err(err) = self.publisher.publish_json(STATUS_SUFFIX, &report).await {
            vend_warn!(context = ctx, "status publish after bring-up failed: {err}");
        }
        Ok(())
    }

    fn roll_back(&self, machine: &mut Machine, powered: &[ManagerKind]) {
        for kind in powered {
            if let Err(err) = machine.manager_mut(*kind).power_off() {
                let ctx = LogContext::new()
                    .with_machine(self.machine_id)
                    .with_manager(kind.as_str());
                vend_warn!(context = ctx, "rollback power off failed: {err}");
            }
        }
        self.transition(MachineState::Off);
    }

    async fn tear_down(&self, machine: &mut Machine, report: &mut ShutdownReport) {
        self.transition(MachineState::ShuttingDown);
        if let Err(err) = self.publisher.publish(EventKind::Shutdown, "shutdown requested").await {
            report.record(ShutdownStep::Announce(EventKind::Shutdown), err);
        }
        for kind in ManagerKind::ORDER {
            if let Err(err) = machine.manager_mut(kind).power_off() {
                report.record(ShutdownStep::PowerOff(kind), err);
            }
        }
        if let Err(err) = self.transport.disconnect().await {
            report.record(ShutdownStep::Disconnect, err);
        }
        self.transition(MachineState::Off);

        let ctx = LogContext::new()
            .with_machine(self.machine_id)
            .with_state(MachineState::Off.as_str());
        if report.is_clean() {
            log_system_event(Some(&ctx), "shutdown", "machine off", SystemEventOutcome::Success);
        } else {
            log_system_event(
                Some(&ctx),
                "shutdown",
                &report.to_string(),
                SystemEventOutcome::Degraded,
            );
        }
    }

    fn rebuild(&self, previous: &Machine) -> Machine {
        match self.lifecycle.restart_policy {
            RestartPolicy::Preserve => {
                let mut fresh = Machine::new(previous.current_config(), Arc::clone(&self.driver));
                fresh
                    .maintenance_mut()
                    .adopt_issues(previous.maintenance().open_issues());
                fresh
            }
            RestartPolicy::FactoryReset => {
                Machine::new(self.factory.clone(), Arc::clone(&self.driver))
            }
        }
    }

    fn require(&self, expected: MachineState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState {
                machine_id: self.machine_id,
                state,
                operation,
            })
        }
    }

    fn transition(&self, next: MachineState) {
        let previous = self.state.send_replace(next);
        if let Some(metrics) = &self.metrics {
            metrics.observe_transition(next.as_str());
        }
        let ctx = LogContext::new()
            .with_machine(self.machine_id)
            .with_state(next.as_str());
        vend_info!(context = ctx, "{previous} -> {next}");
    }

    fn status_of(&self, machine: &Machine) -> StatusReport {
        StatusReport {
            machine_id: self.machine_id,
            state: self.state(),
            timestamp: Utc::now(),
            snapshot: machine.snapshot(),
        }
    }

    fn initialization_failed(&self, stage: &str, reason: impl fmt::Display) -> OrchestratorError {
        let ctx = LogContext::new()
            .with_machine(self.machine_id)
            .with_state(MachineState::Off.as_str());
        let message = format!("initialization failed at {stage}: {reason}");
        log_system_event(Some(&ctx), "initialize", &message, SystemEventOutcome::Fault);
        OrchestratorError::InitializationFailed {
            machine_id: self.machine_id,
            stage: stage.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Best-effort event: a failed publish is logged and otherwise ignored.
    async fn announce(&self, kind: EventKind, description: impl Into<String>) {
        if let Err(err) = self.publisher.publish(kind, description).await {
            let ctx = LogContext::new().with_machine(self.machine_id);
            vend_warn!(context = ctx, "{kind} event dropped: {err}");
        }
    }

    /// Open an issue for `category` unless one is already open.
    async fn request_maintenance(&self, machine: &mut Machine, category: &str, detail: String) {
        match machine
            .maintenance_mut()
            .report_unless_open(category, detail.clone())
        {
            Ok(Some(issue)) => {
                self.announce(
                    EventKind::MaintenanceRequested,
                    format!("issue {issue} [{category}]: {detail}"),
                )
                .await;
            }
            Ok(None) => {}
            Err(err) => {
                let ctx = LogContext::new()
                    .with_machine(self.machine_id)
                    .with_manager(ManagerKind::Maintenance.as_str());
                vend_warn!(context = ctx, "maintenance request for {category} failed: {err}");
            }
        }
    }

    async fn close_issue(&self, machine: &mut Machine, category: &str, resolution: &str) {
        let Some(issue_id) = machine
            .maintenance()
            .open_issue(category)
            .map(|issue| issue.id)
        else {
            return;
        };
        if machine
            .maintenance_mut()
            .resolve_issue(issue_id, resolution)
            .is_ok()
        {
            self.announce(
                EventKind::IssueResolved,
                format!("issue {issue_id} [{category}]: {resolution}"),
            )
            .await;
        }
    }

    async fn reject<T>(&self, reason: DispenseRejection, detail: String) -> Result<T> {
        self.announce(EventKind::Error, format!("{}: {detail}", reason.code()))
            .await;
        Err(OrchestratorError::DispenseRejected {
            machine_id: self.machine_id,
            reason,
            detail,
        })
    }
}

impl fmt::Debug for MachineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineOrchestrator")
            .field("machine_id", &self.machine_id)
            .field("state", &self.state())
            .field("transport", &self.transport.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;
    use vend_common::{BeverageConfig, CartridgeConfig};
    use vend_hw::{PowerAction, PowerState, RecordingDriver};
    use vend_msg::{EventEnvelope, InMemoryTransport};

    use crate::timer::RecordingTimer;

    fn config() -> MachineConfig {
        let mut config = MachineConfig::new(42, 7, 10_000);
        config.cash_balance_cents = 1_000;
        config.cartridges = vec![
            CartridgeConfig {
                id: 1,
                name: "espresso".into(),
                quantity: 20,
                capacity: 50,
            },
            CartridgeConfig {
                id: 2,
                name: "milk".into(),
                quantity: 4,
                capacity: 10,
            },
        ];
        config.beverages = vec![
            BeverageConfig {
                id: 10,
                name: "espresso".into(),
                price_cents: 80,
                recipe: vec![1],
            },
            BeverageConfig {
                id: 11,
                name: "cappuccino".into(),
                price_cents: 120,
                recipe: vec![1, 2],
            },
        ];
        config
    }

    fn rejection(err: &OrchestratorError) -> Option<DispenseRejection> {
        match err {
            OrchestratorError::DispenseRejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    struct Rig {
        orchestrator: MachineOrchestrator,
        transport: InMemoryTransport,
        driver: RecordingDriver,
        timer: RecordingTimer,
    }

    fn rig_with(config: MachineConfig, lifecycle: LifecycleConfig) -> Rig {
        let transport = InMemoryTransport::named("machine-42");
        let driver = RecordingDriver::new();
        let timer = RecordingTimer::new();
        let orchestrator = MachineOrchestrator::builder(config, Arc::new(transport.clone()))
            .driver(Arc::new(driver.clone()))
            .timer(Arc::new(timer.clone()))
            .lifecycle(lifecycle)
            .build();
        Rig {
            orchestrator,
            transport,
            driver,
            timer,
        }
    }

    fn rig() -> Rig {
        rig_with(config(), LifecycleConfig::default())
    }

    fn event_kinds(transport: &InMemoryTransport) -> Vec<EventKind> {
        transport
            .published_matching("vending/42/events/+")
            .iter()
            .map(|message| EventEnvelope::from_payload(&message.payload).unwrap().event_kind)
            .collect()
    }

    fn descriptions(transport: &InMemoryTransport, kind: EventKind) -> Vec<String> {
        transport
            .published_matching(&format!("vending/42/{}", kind.topic_suffix()))
            .iter()
            .map(|message| EventEnvelope::from_payload(&message.payload).unwrap().description)
            .collect()
    }

    #[tokio::test]
    async fn initialize_powers_on_in_order_and_announces() {
        let rig = rig();
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
        rig.orchestrator.initialize().await.unwrap();

        assert_eq!(rig.orchestrator.state(), MachineState::Running);
        let ups: Vec<_> = rig.driver.calls().into_iter().map(|call| call.kind).collect();
        assert_eq!(ups, ManagerKind::ORDER.to_vec());
        assert!(rig.transport.is_connected());
        assert_eq!(event_kinds(&rig.transport), vec![EventKind::Initialized]);
        let status = rig.transport.published_matching("vending/42/status");
        assert_eq!(status.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&status[0].payload).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["snapshot"]["cash"]["power"], "on");
    }

    #[tokio::test]
    async fn failed_power_on_rolls_back_and_never_runs() {
        let rig = rig();
        rig.driver.fail_power_up(ManagerKind::Beverage);

        let err = rig.orchestrator.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InitializationFailed { machine_id: 42, ref stage, .. }
                if stage == "beverage"
        ));
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
        assert!(!rig.transport.is_connected());
        let status = rig.orchestrator.status().await;
        assert_eq!(status.snapshot.cash.power, PowerState::Off);
        let actions: Vec<_> = rig
            .driver
            .calls()
            .into_iter()
            .map(|call| (call.kind, call.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                (ManagerKind::Cash, PowerAction::Up),
                (ManagerKind::Beverage, PowerAction::Up),
                (ManagerKind::Cash, PowerAction::Down),
            ]
        );
    }

    #[tokio::test]
    async fn transport_failure_aborts_initialization() {
        let rig = rig();
        rig.transport.set_fail_connect(true);
        let err = rig.orchestrator.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InitializationFailed { ref stage, .. } if stage == "transport"
        ));
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
        let status = rig.orchestrator.status().await;
        assert_eq!(status.snapshot.maintenance.power, PowerState::Off);

        rig.transport.set_fail_connect(false);
        rig.orchestrator.initialize().await.unwrap();
        assert_eq!(rig.orchestrator.state(), MachineState::Running);
    }

    #[tokio::test]
    async fn shutdown_attempts_every_step_and_reaches_off() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.driver.fail_power_down(ManagerKind::Cash);

        let err = rig.orchestrator.shutdown().await.unwrap_err();
        let report = match err {
            OrchestratorError::ShutdownPartialFailure(report) => report,
            other => panic!("expected partial failure, got {other:?}"),
        };
        assert_eq!(report.failures.len(), 1);
        assert!(report.failed(ShutdownStep::PowerOff(ManagerKind::Cash)));
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
        assert!(!rig.transport.is_connected());

        let downs: Vec<_> = rig
            .driver
            .calls()
            .into_iter()
            .filter(|call| call.action == PowerAction::Down)
            .map(|call| call.kind)
            .collect();
        assert_eq!(downs, ManagerKind::ORDER.to_vec());
        assert_eq!(
            event_kinds(&rig.transport),
            vec![EventKind::Initialized, EventKind::Shutdown]
        );
    }

    #[tokio::test]
    async fn shutdown_publish_failure_is_reported() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.transport.set_fail_publish(true);

        let err = rig.orchestrator.shutdown().await.unwrap_err();
        let report = match err {
            OrchestratorError::ShutdownPartialFailure(report) => report,
            other => panic!("expected partial failure, got {other:?}"),
        };
        assert!(report.failed(ShutdownStep::Announce(EventKind::Shutdown)));
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
    }

    #[tokio::test]
    async fn lifecycle_operations_require_the_right_state() {
        let rig = rig();
        assert!(matches!(
            rig.orchestrator.shutdown().await,
            Err(OrchestratorError::InvalidState { state: MachineState::Off, .. })
        ));
        assert!(matches!(
            rig.orchestrator.restart().await,
            Err(OrchestratorError::InvalidState { .. })
        ));
        assert!(matches!(
            rig.orchestrator.insert_credit(100).await,
            Err(OrchestratorError::InvalidState { operation: "accept credit", .. })
        ));
        rig.orchestrator.initialize().await.unwrap();
        assert!(matches!(
            rig.orchestrator.initialize().await,
            Err(OrchestratorError::InvalidState { state: MachineState::Running, .. })
        ));
    }

    #[tokio::test]
    async fn restart_waits_the_settle_delay_between_shutdown_and_bring_up() {
        let journal = Arc::new(SyncMutex::new(Vec::new()));
        let transport = InMemoryTransport::with_journal(journal.clone());
        let driver = RecordingDriver::with_journal(journal.clone());
        let timer = RecordingTimer::with_journal(journal.clone());
        let orchestrator = MachineOrchestrator::builder(config(), Arc::new(transport.clone()))
            .driver(Arc::new(driver))
            .timer(Arc::new(timer.clone()))
            .build();
        orchestrator.initialize().await.unwrap();
        journal.lock().clear();
        let mut states = orchestrator.subscribe_state();

        let outcome = orchestrator.restart().await.unwrap();
        assert_eq!(outcome, RestartOutcome::Clean);
        assert_eq!(orchestrator.state(), MachineState::Running);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), MachineState::Running);
        assert_eq!(timer.requests(), vec![Duration::from_secs(5)]);

        let entries = journal.lock().clone();
        assert_eq!(
            entries,
            vec![
                "publish vending/42/events/restart",
                "publish vending/42/events/shutdown",
                "power-down cash",
                "power-down beverage",
                "power-down wafer-cartridge",
                "power-down maintenance",
                "disconnect",
                "sleep 5s",
                "power-up cash",
                "power-up beverage",
                "power-up wafer-cartridge",
                "power-up maintenance",
                "connect",
                "publish vending/42/events/initialized",
                "publish vending/42/status",
            ]
        );
    }

    #[tokio::test]
    async fn restart_is_degraded_but_reinitializes_after_partial_shutdown() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.transport.set_fail_disconnect(true);

        let outcome = rig.orchestrator.restart().await.unwrap();
        let report = match outcome {
            RestartOutcome::Degraded(report) => report,
            RestartOutcome::Clean => panic!("expected degraded restart"),
        };
        assert!(report.failed(ShutdownStep::Disconnect));
        assert_eq!(rig.orchestrator.state(), MachineState::Running);
    }

    #[tokio::test]
    async fn failed_reinitialization_surfaces_and_leaves_machine_off() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.driver.fail_power_up(ManagerKind::Maintenance);

        let err = rig.orchestrator.restart().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InitializationFailed { .. }));
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
        assert_eq!(rig.timer.requests().len(), 1);
    }

    #[tokio::test]
    async fn restart_preserves_state_unless_factory_reset() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.orchestrator.insert_credit(100).await.unwrap();
        rig.orchestrator.request_beverage(10, 2).await.unwrap();
        rig.orchestrator
            .operate("report issue", |machine| {
                machine.maintenance_mut().report_issue("jam", "cup stuck")
            })
            .await
            .unwrap();
        rig.orchestrator.restart().await.unwrap();

        let status = rig.orchestrator.status().await;
        assert_eq!(status.snapshot.cash.balance_cents, 1_080);
        assert_eq!(status.snapshot.cartridges.cartridges[0].quantity, 19);
        assert_eq!(status.snapshot.maintenance.open_issues.len(), 1);

        let lifecycle = LifecycleConfig {
            restart_policy: RestartPolicy::FactoryReset,
            ..LifecycleConfig::default()
        };
        let rig = rig_with(config(), lifecycle);
        rig.orchestrator.initialize().await.unwrap();
        rig.orchestrator.insert_credit(100).await.unwrap();
        rig.orchestrator.request_beverage(10, 0).await.unwrap();
        rig.orchestrator.restart().await.unwrap();
        let status = rig.orchestrator.status().await;
        assert_eq!(status.snapshot.cash.balance_cents, 1_000);
        assert_eq!(status.snapshot.cartridges.cartridges[0].quantity, 20);
    }

    #[tokio::test]
    async fn dispense_charges_consumes_and_announces() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        assert_eq!(rig.orchestrator.insert_credit(200).await.unwrap(), 200);

        let receipt = rig.orchestrator.request_beverage(11, 1).await.unwrap();
        assert_eq!(receipt.price_cents, 120);
        assert_eq!(receipt.remaining_credit_cents, 80);
        assert_eq!(receipt.sugar_level, 1);
        assert_eq!(rig.timer.requests(), vec![Duration::from_secs(5)]);

        assert_eq!(
            event_kinds(&rig.transport),
            vec![
                EventKind::Initialized,
                EventKind::CreditInserted,
                EventKind::DispenseStarted,
                EventKind::Warning,
                EventKind::DispenseCompleted,
            ]
        );
        assert_eq!(
            descriptions(&rig.transport, EventKind::Warning),
            vec!["cartridge-low: milk at 3 of 10"]
        );
        assert_eq!(rig.orchestrator.return_credit().await.unwrap(), 80);
        let status = rig.orchestrator.status().await;
        assert_eq!(status.snapshot.cash.credit_cents, 0);
        assert_eq!(status.snapshot.cash.balance_cents, 1_120);
        assert_eq!(status.snapshot.beverages.dispensing, None);
    }

    #[tokio::test]
    async fn dispense_rejections_publish_error_codes() {
        let mut config = config();
        config.cartridges[1].quantity = 0;
        let rig = rig_with(config, LifecycleConfig::default());
        rig.orchestrator.initialize().await.unwrap();

        let err = rig.orchestrator.request_beverage(99, 0).await.unwrap_err();
        assert_eq!(rejection(&err), Some(DispenseRejection::BeverageUnavailable));
        let err = rig.orchestrator.request_beverage(11, 0).await.unwrap_err();
        assert_eq!(rejection(&err), Some(DispenseRejection::InsufficientCartridges));
        let err = rig.orchestrator.request_beverage(10, 0).await.unwrap_err();
        assert_eq!(rejection(&err), Some(DispenseRejection::InsufficientCredit));

        let codes: Vec<String> = descriptions(&rig.transport, EventKind::Error)
            .into_iter()
            .map(|description| description.split(':').next().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(
            codes,
            vec!["beverage-unavailable", "insufficient-cartridges", "insufficient-credit"]
        );
        assert!(rig.timer.requests().is_empty());
    }

    #[tokio::test]
    async fn near_full_cash_box_raises_warning() {
        let mut config = config();
        config.cash_capacity_cents = 1_200;
        let rig = rig_with(config, LifecycleConfig::default());
        rig.orchestrator.initialize().await.unwrap();
        rig.orchestrator.insert_credit(80).await.unwrap();
        rig.orchestrator.request_beverage(10, 0).await.unwrap();

        let warnings = descriptions(&rig.transport, EventKind::Warning);
        assert_eq!(warnings, vec!["cash-box-near-full: 1080 of 1200 cents"]);
    }

    #[tokio::test]
    async fn rejected_coin_publishes_error() {
        let mut config = config();
        config.cash_capacity_cents = 1_050;
        let rig = rig_with(config, LifecycleConfig::default());
        rig.orchestrator.initialize().await.unwrap();

        let err = rig.orchestrator.insert_credit(100).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Hardware(HardwareError::CapacityExceeded { .. })
        ));
        let errors = descriptions(&rig.transport, EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("credit-rejected"));
    }

    #[tokio::test]
    async fn handle_routes_commands() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        let reply = rig
            .orchestrator
            .handle(Command::InsertCredit { amount_cents: 50 })
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::Credit { credit_cents: 50 });
        let reply = rig.orchestrator.handle(Command::Status).await.unwrap();
        assert!(matches!(
            reply,
            CommandReply::Status { report } if report.snapshot.cash.credit_cents == 50
        ));
        let reply = rig.orchestrator.handle(Command::Shutdown).await.unwrap();
        assert_eq!(reply, CommandReply::ShutDown);
        assert_eq!(rig.orchestrator.state(), MachineState::Off);
    }

    #[test]
    fn command_filters_are_machine_scoped() {
        let rig = rig();
        assert_eq!(
            rig.orchestrator.command_filters(),
            vec![
                "vending/42/commands/+",
                "vending/42/operations/+",
                "vending/42/cartridges/+",
                "vending/42/maintenance/+",
                "vending/42/cash/+",
            ]
        );
    }

    #[tokio::test]
    async fn maintenance_mode_refuses_customers() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        assert!(rig.orchestrator.set_maintenance_mode(true).await.unwrap());

        let err = rig.orchestrator.insert_credit(100).await.unwrap_err();
        assert_eq!(rejection(&err), Some(DispenseRejection::InMaintenance));
        let err = rig.orchestrator.request_beverage(10, 0).await.unwrap_err();
        assert_eq!(rejection(&err), Some(DispenseRejection::InMaintenance));

        let errors = descriptions(&rig.transport, EventKind::Error);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|error| error.starts_with("machine-in-maintenance: ")));
        let cash = rig.orchestrator.status().await.snapshot.cash;
        assert_eq!((cash.balance_cents, cash.credit_cents), (1_000, 0));
        assert!(descriptions(&rig.transport, EventKind::DispenseStarted).is_empty());

        let reply = rig
            .orchestrator
            .handle(Command::ExitMaintenance)
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::MaintenanceMode { active: false });
        assert_eq!(rig.orchestrator.insert_credit(100).await.unwrap(), 100);
        assert_eq!(
            descriptions(&rig.transport, EventKind::MaintenanceStarted),
            vec!["maintenance mode entered"]
        );
        assert_eq!(
            descriptions(&rig.transport, EventKind::MaintenanceEnded),
            vec!["maintenance mode left"]
        );
    }

    #[tokio::test]
    async fn exhausted_cartridge_opens_one_refill_issue() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        rig.orchestrator.insert_credit(480).await.unwrap();
        for _ in 0..4 {
            rig.orchestrator.request_beverage(11, 0).await.unwrap();
        }

        let warnings = descriptions(&rig.transport, EventKind::Warning);
        assert_eq!(
            warnings,
            vec!["cartridge-low: milk at 3 of 10", "cartridge-refill-required: milk at 1 of 10"]
        );
        let requested = descriptions(&rig.transport, EventKind::MaintenanceRequested);
        assert_eq!(requested, vec!["issue 1 [cartridge-refill:milk]: milk at 1 of 10"]);

        let report = rig.orchestrator.maintenance_report().await.unwrap();
        assert!(report.requires_intervention);
        assert!(!report.maintenance_mode);
        assert_eq!(report.open_issues.len(), 1);
        assert_eq!(report.open_issues[0].category, cartridge_refill_issue("milk"));
        assert_eq!(
            rig.transport.published_matching("vending/42/status/maintenance").len(),
            1
        );

        let refill = rig.orchestrator.refill_cartridges(&[(2, 5), (9, 1)]).await.unwrap();
        assert_eq!(refill.unknown, vec![9]);
        let milk = refill.levels.iter().find(|level| level.id == 2).unwrap();
        assert_eq!((milk.quantity, milk.status), (5, StockStatus::Ok));
        assert_eq!(
            descriptions(&rig.transport, EventKind::IssueResolved),
            vec!["issue 1 [cartridge-refill:milk]: refilled"]
        );
        assert_eq!(
            descriptions(&rig.transport, EventKind::CartridgesRefilled),
            vec!["1 cartridge(s) refilled"]
        );
        assert!(!rig.orchestrator.maintenance_report().await.unwrap().requires_intervention);
    }

    #[tokio::test]
    async fn full_cash_box_is_reported_until_emptied() {
        let mut config = config();
        config.cash_capacity_cents = 1_300;
        let rig = rig_with(config, LifecycleConfig::default());
        rig.orchestrator.initialize().await.unwrap();

        for _ in 0..2 {
            rig.orchestrator.insert_credit(80).await.unwrap();
            rig.orchestrator.request_beverage(10, 0).await.unwrap();
        }
        assert_eq!(
            descriptions(&rig.transport, EventKind::Warning),
            vec![
                "cash-box-near-full: 1080 of 1300 cents",
                "cash-box-near-full: 1160 of 1300 cents"
            ]
        );
        assert_eq!(
            descriptions(&rig.transport, EventKind::MaintenanceRequested),
            vec!["issue 1 [cash-box-full]: 1080 of 1300 cents"]
        );

        let reply = rig.orchestrator.handle(Command::EmptyCashBox).await.unwrap();
        assert_eq!(reply, CommandReply::CashCollected { amount_cents: 1_160 });
        assert_eq!(
            descriptions(&rig.transport, EventKind::IssueResolved),
            vec!["issue 1 [cash-box-full]: cash box emptied"]
        );
        assert_eq!(
            descriptions(&rig.transport, EventKind::CashBoxEmptied),
            vec!["1160 cents collected"]
        );
        let report = rig.orchestrator.maintenance_report().await.unwrap();
        assert!(report.open_issues.is_empty());
    }

    #[tokio::test]
    async fn manual_issues_are_reported_and_resolved() {
        let rig = rig();
        rig.orchestrator.initialize().await.unwrap();
        let reply = rig
            .orchestrator
            .handle(Command::ReportIssue {
                category: "jam".into(),
                description: "cup stuck".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::IssueReported { issue_id: 1 });

        let reply = rig
            .orchestrator
            .handle(Command::ResolveIssue {
                issue_id: 1,
                resolution: "cleared".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, CommandReply::IssueResolved { issue } if issue.category == "jam"));
        let err = rig.orchestrator.resolve_issue(1, "again").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Hardware(HardwareError::UnknownIssue(1))
        ));

        let reply = rig.orchestrator.handle(Command::CartridgeStatus).await.unwrap();
        assert!(matches!(reply, CommandReply::Stock { ref levels } if levels.len() == 2));
        assert_eq!(rig.transport.published_matching("vending/42/status/cartridges").len(), 1);
    }
}
