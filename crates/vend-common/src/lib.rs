//! ---
//! vend_section: "01-core-functionality"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Shared configuration and tracing bootstrap."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Core shared primitives for the vending fleet workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by every other crate and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BeverageConfig, CartridgeConfig, LifecycleConfig, LoadedAppConfig, LoggingConfig,
    MachineConfig, MqttConfig, RestartPolicy,
};
pub use logging::{init_tracing, LogFormat};
