//! ---
//! vend_section: "01-core-functionality"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Configuration model and loader for the fleet runtime."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mqtt_host() -> String {
    "localhost".to_owned()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "vend_".to_owned()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_qos() -> u8 {
    1
}

fn default_topic_root() -> String {
    "vending".to_owned()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_capacity() -> usize {
    64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_sink_enabled() -> bool {
    true
}

fn default_sink_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_sink_queue_capacity() -> usize {
    1024
}

fn default_sink_flush_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_dispense_duration() -> Duration {
    Duration::from_secs(5)
}

/// Primary configuration object for the fleet runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub machines: Vec<MachineConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "VEND_CONFIG";

    /// Load configuration from disk, respecting the `VEND_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a machine configuration by identifier.
    pub fn machine(&self, machine_id: u32) -> Option<&MachineConfig> {
        self.machines.iter().find(|machine| machine.id == machine_id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;
        if self.machines.is_empty() {
            return Err(anyhow!("configuration must contain at least one machine"));
        }
        let mut seen = HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.id) {
                return Err(anyhow!("machine {} is declared more than once", machine.id));
            }
            machine.validate()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Broker connection and topic layout settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_connection_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connection_timeout: Duration,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    /// Consecutive reconnect failures tolerated before the event loop gives up.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base backoff; attempt `n` waits `retry_interval * 2^n`.
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_interval: Duration,
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id_prefix: default_client_id_prefix(),
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            connection_timeout: default_connection_timeout(),
            qos: default_qos(),
            topic_root: default_topic_root(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval: default_retry_interval(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("mqtt host must not be empty"));
        }
        if self.qos > 2 {
            return Err(anyhow!("mqtt qos must be 0, 1 or 2 (got {})", self.qos));
        }
        let root = self.topic_root.as_str();
        if root.is_empty() || root.contains(['/', '+', '#']) {
            return Err(anyhow!(
                "mqtt topic_root '{}' must be a single non-wildcard segment",
                root
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(anyhow!("mqtt username and password must be set together"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_sink_enabled")]
    pub sink_enabled: bool,
    /// Directory receiving the dated `<yyyy-MM-dd>.log` files.
    #[serde(default = "default_sink_directory")]
    pub sink_directory: PathBuf,
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default = "default_sink_flush_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sink_flush_timeout: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            sink_enabled: default_sink_enabled(),
            sink_directory: default_sink_directory(),
            sink_queue_capacity: default_sink_queue_capacity(),
            sink_flush_timeout: default_sink_flush_timeout(),
        }
    }
}

/// How a restart rebuilds the machine it just powered down.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Keep identity, configuration, cash balance and stock levels.
    #[default]
    Preserve,
    /// Rebuild from the configured defaults, keeping only the machine identity.
    FactoryReset,
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preserve" => Ok(RestartPolicy::Preserve),
            "factory-reset" | "factory_reset" => Ok(RestartPolicy::FactoryReset),
            other => Err(format!("unknown restart policy: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_settle_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub settle_delay: Duration,
    #[serde(default = "default_dispense_duration")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dispense_duration: Duration,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            settle_delay: default_settle_delay(),
            dispense_duration: default_dispense_duration(),
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// Static description of one vending machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub id: u32,
    pub institute_id: u32,
    #[serde(default)]
    pub institute_name: Option<String>,
    pub cash_capacity_cents: u64,
    #[serde(default)]
    pub cash_balance_cents: u64,
    #[serde(default)]
    pub beverages: Vec<BeverageConfig>,
    #[serde(default)]
    pub cartridges: Vec<CartridgeConfig>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl MachineConfig {
    /// Minimal machine with no catalog, mostly useful for tests.
    pub fn new(id: u32, institute_id: u32, cash_capacity_cents: u64) -> Self {
        Self {
            id,
            institute_id,
            institute_name: None,
            cash_capacity_cents,
            cash_balance_cents: 0,
            beverages: Vec::new(),
            cartridges: Vec::new(),
            metadata: IndexMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let id = self.id;
        if self.cash_capacity_cents == 0 {
            return Err(anyhow!("machine {} must have a positive cash capacity", id));
        }
        if self.cash_balance_cents > self.cash_capacity_cents {
            return Err(anyhow!(
                "machine {} cash balance {} exceeds capacity {}",
                id,
                self.cash_balance_cents,
                self.cash_capacity_cents
            ));
        }
        let mut cartridge_ids = HashSet::new();
        for cartridge in &self.cartridges {
            if !cartridge_ids.insert(cartridge.id) {
                return Err(anyhow!(
                    "machine {} declares cartridge {} twice",
                    id,
                    cartridge.id
                ));
            }
            if cartridge.quantity > cartridge.capacity {
                return Err(anyhow!(
                    "machine {} cartridge {} quantity {} exceeds capacity {}",
                    id,
                    cartridge.id,
                    cartridge.quantity,
                    cartridge.capacity
                ));
            }
        }
        let mut beverage_ids = HashSet::new();
        for beverage in &self.beverages {
            if !beverage_ids.insert(beverage.id) {
                return Err(anyhow!(
                    "machine {} declares beverage {} twice",
                    id,
                    beverage.id
                ));
            }
            if beverage.price_cents == 0 {
                return Err(anyhow!(
                    "machine {} beverage {} must have a positive price",
                    id,
                    beverage.id
                ));
            }
            if beverage.recipe.is_empty() {
                return Err(anyhow!(
                    "machine {} beverage {} has an empty recipe",
                    id,
                    beverage.id
                ));
            }
            if let Some(missing) = beverage
                .recipe
                .iter()
                .find(|cartridge| !cartridge_ids.contains(*cartridge))
            {
                return Err(anyhow!(
                    "machine {} beverage {} references unknown cartridge {}",
                    id,
                    beverage.id,
                    missing
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeverageConfig {
    pub id: u32,
    pub name: String,
    pub price_cents: u64,
    /// Cartridge ids consumed per cup; repeats mean more than one unit.
    pub recipe: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartridgeConfig {
    pub id: u32,
    pub name: String,
    pub quantity: u32,
    pub capacity: u32,
}
