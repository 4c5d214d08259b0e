//! Configuration Management Module
//!
//! The config is loaded once at startup, validated, and handed to the
//! supervisor by value.

pub mod storage;
pub mod types;

pub use storage::{load_config, validate, write_template, ConfigError};
pub use types::{
    split_host_port, ForwarderConfig, GatewayConfig, TransportSpec, DEFAULT_DIAL_TIMEOUT_SECS,
};
