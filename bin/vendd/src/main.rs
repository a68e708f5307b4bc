//! ---
//! vend_section: "06-daemon"
//! vend_subsection: "binary"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Binary entrypoint for the vending fleet daemon."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tracing::{debug, error, info, warn};
use vend_common::{init_tracing, AppConfig, LogFormat};
use vend_logging::LogSink;
use vend_msg::{MessagingMetricsExporter, MqttTransport, RumqttTransport, TopicCodec};
use vend_orchestrator::{Fleet, FleetMonitor, MachineOrchestrator};

#[derive(Debug, Parser)]
#[command(author, version, about = "Vending fleet daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "VEND_CONFIG", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Bring the fleet up and serve commands until interrupted")]
    Run,
    #[command(about = "Validate the configuration and list the machines")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("Configuration: {}", loaded.source.display());
            println!(
                "Broker: {}:{} (root '{}')",
                config.mqtt.host, config.mqtt.port, config.mqtt.topic_root
            );
            for machine in &config.machines {
                println!(
                    "Machine {}: institute {}, {} beverage(s), {} cartridge(s)",
                    machine.id,
                    machine.institute_id,
                    machine.beverages.len(),
                    machine.cartridges.len()
                );
            }
            Ok(())
        }
        Commands::Run => {
            let sink = if config.logging.sink_enabled {
                Some(
                    LogSink::start(
                        &config.logging.sink_directory,
                        config.logging.sink_queue_capacity,
                    )
                    .context("failed to start log sink")?,
                )
            } else {
                None
            };
            init_tracing("vendd", &config.logging, sink.as_ref())?;
            info!(
                config = %loaded.source.display(),
                machines = config.machines.len(),
                load_ms = load_started.elapsed().as_millis() as u64,
                "configuration loaded"
            );

            let outcome = run_daemon(config.clone()).await;

            if let Some(sink) = sink {
                let timeout = config.logging.sink_flush_timeout;
                let flushed = tokio::task::spawn_blocking(move || sink.shutdown(timeout)).await?;
                if !flushed {
                    eprintln!("log sink did not drain within {timeout:?}");
                }
            }
            outcome
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = Registry::new();
    let metrics = MessagingMetricsExporter::register(&registry)?;

    let mut fleet = Fleet::new(config.mqtt.topic_root.clone()).with_metrics(metrics.clone());
    for machine in &config.machines {
        let transport =
            RumqttTransport::new(format!("machine_{}", machine.id), config.mqtt.clone());
        info!(machine_id = machine.id, client_id = transport.client_id(), "machine registered");
        fleet.insert(
            MachineOrchestrator::builder(machine.clone(), Arc::new(transport))
                .lifecycle(config.lifecycle.clone())
                .topic_root(config.mqtt.topic_root.clone())
                .metrics(metrics.clone())
                .build(),
        );
    }
    let fleet = Arc::new(fleet);

    let workers = fleet.listen(config.mqtt.request_capacity).await?;
    let failures = fleet.initialize_all().await;
    for failure in &failures {
        error!(error = %failure, "machine failed to initialize");
    }
    let monitor_transport = Arc::new(RumqttTransport::new("monitor", config.mqtt.clone()));
    let monitor = Arc::new(FleetMonitor::new(
        TopicCodec::new(config.mqtt.topic_root.clone()),
        monitor_transport.clone(),
    ));
    let monitor_worker = match monitor_transport.connect().await {
        Ok(()) => Some(monitor.start(config.mqtt.request_capacity).await?),
        Err(err) => {
            warn!(error = %err, "fleet monitor unavailable");
            None
        }
    };
    info!(
        running = fleet.len() - failures.len(),
        failed = failures.len(),
        "daemon running; waiting for termination signal"
    );

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let summary = fleet.shutdown_all().await;
    for worker in workers {
        worker.abort();
    }
    if let Some(worker) = monitor_worker {
        worker.abort();
        if let Err(err) = monitor_transport.disconnect().await {
            warn!(error = %err, "fleet monitor disconnect failed");
        }
    }
    if summary.is_clean() {
        info!(clean = summary.clean.len(), skipped = summary.skipped.len(), "fleet shut down");
    } else {
        for report in &summary.degraded {
            warn!(report = %report, "machine shut down with failures");
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    debug!(metrics = %String::from_utf8_lossy(&buffer), "final metrics snapshot");
    Ok(())
}
