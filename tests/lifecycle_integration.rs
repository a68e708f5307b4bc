//! ---
//! vend_section: "15-testing"
//! vend_subsection: "integration-tests"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Lifecycle integration tests across hardware, messaging and orchestration."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use vend_common::{BeverageConfig, CartridgeConfig, MachineConfig};
use vend_hw::{ManagerKind, PowerAction, RecordingDriver};
use vend_msg::{decode_machine_id, EventEnvelope, EventKind, InMemoryTransport, MqttTransport};
use vend_orchestrator::{
    MachineOrchestrator, MachineState, OrchestratorError, RecordingTimer, RestartOutcome,
    TokioTimer,
};

fn machine_config() -> MachineConfig {
    let mut config = MachineConfig::new(42, 3, 20_000);
    config.cartridges = vec![CartridgeConfig {
        id: 1,
        name: "espresso".into(),
        quantity: 40,
        capacity: 50,
    }];
    config.beverages = vec![BeverageConfig {
        id: 1,
        name: "espresso".into(),
        price_cents: 80,
        recipe: vec![1],
    }];
    config
}

fn restart_block() -> Vec<String> {
    [
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
    .into_iter()
    .map(String::from)
    .collect()
}

#[tokio::test]
async fn shutdown_with_failing_cash_manager_still_reaches_off() {
    let transport = InMemoryTransport::new();
    let driver = RecordingDriver::new();
    let orchestrator = MachineOrchestrator::builder(machine_config(), Arc::new(transport.clone()))
        .driver(Arc::new(driver.clone()))
        .timer(Arc::new(RecordingTimer::new()))
        .build();
    orchestrator.initialize().await.unwrap();
    driver.fail_power_down(ManagerKind::Cash);

    match orchestrator.shutdown().await {
        Err(OrchestratorError::ShutdownPartialFailure(report)) => {
            assert_eq!(report.machine_id, 42);
            assert_eq!(report.failures.len(), 1);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    assert_eq!(orchestrator.state(), MachineState::Off);
    assert!(!transport.is_connected());

    let attempted: Vec<_> = driver
        .calls()
        .into_iter()
        .filter(|call| call.action == PowerAction::Down)
        .map(|call| (call.kind, call.failed))
        .collect();
    assert_eq!(
        attempted,
        vec![
            (ManagerKind::Cash, true),
            (ManagerKind::Beverage, false),
            (ManagerKind::WaferCartridge, false),
            (ManagerKind::Maintenance, false),
        ]
    );

    let shutdown = transport.published_matching("vending/+/events/shutdown");
    assert_eq!(shutdown.len(), 1);
    assert_eq!(decode_machine_id(&shutdown[0].topic).unwrap(), 42);
    let envelope = EventEnvelope::from_payload(&shutdown[0].payload).unwrap();
    assert_eq!(envelope.event_kind, EventKind::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn restart_observes_the_settle_delay_on_the_clock() {
    let transport = InMemoryTransport::new();
    let orchestrator = Arc::new(
        MachineOrchestrator::builder(machine_config(), Arc::new(transport.clone()))
            .driver(Arc::new(RecordingDriver::new()))
            .timer(Arc::new(TokioTimer))
            .build(),
    );
    orchestrator.initialize().await.unwrap();
    let mut states = orchestrator.subscribe_state();

    let started = tokio::time::Instant::now();
    let restarting = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.restart().await })
    };

    states
        .wait_for(|state| *state == MachineState::Restarting)
        .await
        .unwrap();
    assert!(!transport.is_connected());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(orchestrator.state(), MachineState::Restarting);

    let outcome = restarting.await.unwrap().unwrap();
    assert_eq!(outcome, RestartOutcome::Clean);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(orchestrator.state(), MachineState::Running);
    assert!(transport.is_connected());
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_restarts_never_interleave_power_operations() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let transport = InMemoryTransport::with_journal(journal.clone());
    let driver = RecordingDriver::with_journal(journal.clone());
    driver.set_latency(Duration::from_millis(5));
    let orchestrator = Arc::new(
        MachineOrchestrator::builder(machine_config(), Arc::new(transport))
            .driver(Arc::new(driver))
            .timer(Arc::new(RecordingTimer::with_journal(journal.clone())))
            .build(),
    );
    orchestrator.initialize().await.unwrap();
    journal.lock().clear();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.restart().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), RestartOutcome::Clean);
    }

    let expected: Vec<String> = std::iter::repeat(restart_block())
        .take(3)
        .flatten()
        .collect();
    assert_eq!(*journal.lock(), expected);
    assert_eq!(orchestrator.state(), MachineState::Running);
}

#[tokio::test]
async fn restart_after_failed_bring_up_is_refused_until_initialized() {
    let driver = RecordingDriver::new();
    let orchestrator =
        MachineOrchestrator::builder(machine_config(), Arc::new(InMemoryTransport::new()))
            .driver(Arc::new(driver.clone()))
            .timer(Arc::new(RecordingTimer::new()))
            .build();
    driver.fail_power_up(ManagerKind::WaferCartridge);

    assert!(matches!(
        orchestrator.initialize().await,
        Err(OrchestratorError::InitializationFailed { .. })
    ));
    assert!(matches!(
        orchestrator.restart().await,
        Err(OrchestratorError::InvalidState { state: MachineState::Off, .. })
    ));

    driver.clear_failures();
    orchestrator.initialize().await.unwrap();
    assert_eq!(orchestrator.state(), MachineState::Running);
}
