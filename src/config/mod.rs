//! Configuration module for the runtime supervisor
//!
//! This module provides configuration loading, persistence and environment overrides.

mod config;
pub mod environment;

// Re-export the main configuration types
pub use config::{CliOverrides, ConfigStore, ServerConfig, DEFAULT_CONFIG_FILE};
pub use environment::{EnvVars, EnvironmentOverrides};
