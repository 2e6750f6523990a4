//! Shared building blocks for the berth session core: process definitions and
//! states, the TOML configuration file, and logging setup.

pub mod config;
pub mod logs;
pub mod types;

pub use config::{load_config, Config, ConfigError};
pub use types::*;
