//! ---
//! vend_section: "05-orchestration"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Registry of machine orchestrators and inbound command routing."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vend_msg::{InboundHandler, InboundMessage, MessagingMetricsExporter, TopicCodec};

use crate::command::{Command, CommandReply};
use crate::orchestrator::MachineOrchestrator;
use crate::state::MachineState;
use crate::{OrchestratorError, Result, ShutdownReport};

/// Aggregated result of shutting the whole fleet down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetShutdownSummary {
    /// Machines that shut down cleanly.
    pub clean: Vec<u32>,
    /// Machines that reached `Off` with failed steps.
    pub degraded: Vec<ShutdownReport>,
    /// Machines that were not running.
    pub skipped: Vec<(u32, MachineState)>,
}

impl FleetShutdownSummary {
    /// Whether every running machine shut down cleanly.
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// One orchestrator per configured machine, addressed by machine id.
#[derive(Debug)]
pub struct Fleet {
    codec: TopicCodec,
    machines: IndexMap<u32, Arc<MachineOrchestrator>>,
    metrics: Option<MessagingMetricsExporter>,
}

impl Fleet {
    /// Empty fleet listening under `topic_root`.
    pub fn new(topic_root: impl Into<String>) -> Self {
        Self {
            codec: TopicCodec::new(topic_root),
            machines: IndexMap::new(),
            metrics: None,
        }
    }

    /// Count inbound traffic into `metrics`.
    pub fn with_metrics(mut self, metrics: MessagingMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register an orchestrator, replacing any previous one with the same id.
    pub fn insert(&mut self, orchestrator: MachineOrchestrator) -> Arc<MachineOrchestrator> {
        let orchestrator = Arc::new(orchestrator);
        self.machines
            .insert(orchestrator.machine_id(), Arc::clone(&orchestrator));
        orchestrator
    }

    /// Orchestrator for `machine_id`.
    pub fn get(&self, machine_id: u32) -> Option<Arc<MachineOrchestrator>> {
        self.machines.get(&machine_id).cloned()
    }

    /// Registered machine ids in insertion order.
    pub fn machine_ids(&self) -> Vec<u32> {
        self.machines.keys().copied().collect()
    }

    /// Number of machines.
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether no machine is registered.
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Bring every machine up concurrently. Returns the failures; machines that
    /// failed stay `Off`.
    pub async fn initialize_all(&self) -> Vec<OrchestratorError> {
        let outcomes = join_all(self.machines.values().map(|machine| machine.initialize())).await;
        outcomes.into_iter().filter_map(|outcome| outcome.err()).collect()
    }

    /// Route an inbound message to the machine its topic addresses.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<CommandReply> {
        let decoded = self.codec.decode(topic)?;
        let orchestrator = self
            .get(decoded.machine_id)
            .ok_or(OrchestratorError::UnknownMachine(decoded.machine_id))?;
        let command = Command::parse(decoded.suffix, payload)?;
        debug!(machine_id = decoded.machine_id, command = command.name(), "dispatching command");
        orchestrator.handle(command).await
    }

    /// Subscribe every machine to its command topics. Each machine gets a
    /// worker that handles its commands one at a time, in arrival order.
    pub async fn listen(self: &Arc<Self>, queue_capacity: usize) -> Result<Vec<JoinHandle<()>>> {
        let mut workers = Vec::with_capacity(self.machines.len());
        for orchestrator in self.machines.values() {
            let machine_id = orchestrator.machine_id();
            let (tx, mut rx) = mpsc::channel::<InboundMessage>(queue_capacity.max(1));
            let handler: InboundHandler = Arc::new(move |message: InboundMessage| {
                if let Err(err) = tx.try_send(message) {
                    warn!(machine_id, error = %err, "inbound command dropped");
                }
            });
            let transport = orchestrator.transport();
            for filter in orchestrator.command_filters() {
                transport.subscribe(&filter, Arc::clone(&handler)).await?;
                info!(machine_id, filter = %filter, "listening for commands");
            }

            let fleet = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    fleet.process(message).await;
                }
            }));
        }
        Ok(workers)
    }

    /// Handle one inbound message and log its outcome.
    pub async fn process(&self, message: InboundMessage) -> Option<CommandReply> {
        if let Some(metrics) = &self.metrics {
            metrics.observe_received();
        }
        match self.dispatch(&message.topic, &message.payload).await {
            Ok(reply) => {
                info!(topic = %message.topic, reply = ?reply, "command handled");
                Some(reply)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_rejected();
                }
                warn!(topic = %message.topic, error = %err, "command rejected");
                None
            }
        }
    }

    /// Shut every running machine down concurrently.
    pub async fn shutdown_all(&self) -> FleetShutdownSummary {
        let outcomes = join_all(self.machines.values().map(|machine| async move {
            (machine.machine_id(), machine.shutdown().await)
        }))
        .await;

        let mut summary = FleetShutdownSummary::default();
        for (machine_id, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.clean.push(machine_id),
                Err(OrchestratorError::ShutdownPartialFailure(report)) => {
                    error!(machine_id, report = %report, "shutdown completed with failures");
                    summary.degraded.push(report);
                }
                Err(OrchestratorError::InvalidState { state, .. }) => {
                    summary.skipped.push((machine_id, state));
                }
                Err(err) => {
                    error!(machine_id, error = %err, "shutdown failed");
                    summary.skipped.push((machine_id, self.machines[&machine_id].state()));
                }
            }
        }
        summary
    }
}
