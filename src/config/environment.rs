//! Environment variable integration for the runtime configuration

use crate::config::ServerConfig;
use crate::error::{Result, RuntimeError};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Environment variable names used by the runtime
pub struct EnvVars;

impl EnvVars {
    pub const CONFIG_PATH: &'static str = "WEBAPP_RUNTIME_CONFIG_PATH";
    pub const DATA_DIR: &'static str = "WEBAPP_RUNTIME_DATA_DIR";
    pub const PORT: &'static str = "WEBAPP_RUNTIME_PORT";
    pub const CONNECTION_TIMEOUT: &'static str = "WEBAPP_RUNTIME_CONNECTION_TIMEOUT";
    pub const BROWSER_COMMAND: &'static str = "WEBAPP_RUNTIME_BROWSER_COMMAND";
    pub const OPEN_TAB: &'static str = "WEBAPP_RUNTIME_OPEN_TAB";
}

/// Environment configuration overrides
#[derive(Debug, Clone, Default)]
pub struct EnvironmentOverrides {
    /// Settings file path override
    pub config_path: Option<PathBuf>,
    /// Directory for per-instance files (lock, marker, address, logs)
    pub data_dir: Option<PathBuf>,
    /// Fixed port override
    pub port: Option<u16>,
    /// Connection timeout override in seconds
    pub connection_timeout: Option<u64>,
    /// Browser command override
    pub browser_command: Option<String>,
    /// Open-tab-at-startup override
    pub open_tab: Option<bool>,
}

impl EnvironmentOverrides {
    /// Load a `.env` file from the working directory if one exists
    pub fn load_env_file() {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {:?}", path),
            Err(e) if e.not_found() => debug!("No .env file found, skipping"),
            Err(e) => warn!("Failed to load .env file: {}", e),
        }
    }

    /// Load environment variable overrides
    pub fn load() -> Result<Self> {
        let mut overrides = EnvironmentOverrides::default();

        if let Some(path) = non_empty_var(EnvVars::CONFIG_PATH) {
            debug!("Environment override: {}={}", EnvVars::CONFIG_PATH, path);
            overrides.config_path = Some(PathBuf::from(path));
        }

        if let Some(path) = non_empty_var(EnvVars::DATA_DIR) {
            debug!("Environment override: {}={}", EnvVars::DATA_DIR, path);
            overrides.data_dir = Some(PathBuf::from(path));
        }

        if let Some(port_str) = non_empty_var(EnvVars::PORT) {
            let port = port_str.parse::<u16>().map_err(|e| {
                RuntimeError::config(format!("Invalid {}: {} ({})", EnvVars::PORT, port_str, e))
            })?;
            debug!("Environment override: {}={}", EnvVars::PORT, port);
            overrides.port = Some(port);
        }

        if let Some(timeout_str) = non_empty_var(EnvVars::CONNECTION_TIMEOUT) {
            let timeout = timeout_str.parse::<u64>().map_err(|e| {
                RuntimeError::config(format!(
                    "Invalid {}: {} ({})",
                    EnvVars::CONNECTION_TIMEOUT,
                    timeout_str,
                    e
                ))
            })?;
            debug!("Environment override: {}={}", EnvVars::CONNECTION_TIMEOUT, timeout);
            overrides.connection_timeout = Some(timeout);
        }

        if let Some(command) = non_empty_var(EnvVars::BROWSER_COMMAND) {
            debug!("Environment override: {}={}", EnvVars::BROWSER_COMMAND, command);
            overrides.browser_command = Some(command);
        }

        if let Some(open_str) = non_empty_var(EnvVars::OPEN_TAB) {
            match parse_bool(&open_str) {
                Some(open) => {
                    debug!("Environment override: {}={}", EnvVars::OPEN_TAB, open);
                    overrides.open_tab = Some(open);
                }
                None => {
                    warn!("Invalid {}: {} (expected: true/false)", EnvVars::OPEN_TAB, open_str);
                    return Err(RuntimeError::config(format!(
                        "Invalid {}: {} (valid options: true, false)",
                        EnvVars::OPEN_TAB,
                        open_str
                    )));
                }
            }
        }

        Ok(overrides)
    }

    /// Apply environment overrides to a config
    pub fn apply_to_config(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            if !config.fixed_port || config.port_number != port {
                info!(
                    "Environment override: fixed port {} (was fixed={}, port={})",
                    port, config.fixed_port, config.port_number
                );
            }
            config.fixed_port = true;
            config.port_number = port;
        }

        if let Some(timeout) = self.connection_timeout {
            config.connection_timeout_seconds = timeout;
        }

        if let Some(ref command) = self.browser_command {
            config.browser_launch_command = Some(command.clone());
        }

        if let Some(open) = self.open_tab {
            config.auto_open_on_start = open;
        }
    }

    /// Check if any environment overrides are active
    pub fn has_overrides(&self) -> bool {
        !self.get_override_summary().is_empty()
    }

    /// Get summary of active overrides for logging
    pub fn get_override_summary(&self) -> Vec<String> {
        let mut summary = Vec::new();

        if let Some(ref path) = self.config_path {
            summary.push(format!("{}={:?}", EnvVars::CONFIG_PATH, path));
        }
        if let Some(ref path) = self.data_dir {
            summary.push(format!("{}={:?}", EnvVars::DATA_DIR, path));
        }
        if let Some(port) = self.port {
            summary.push(format!("{}={}", EnvVars::PORT, port));
        }
        if let Some(timeout) = self.connection_timeout {
            summary.push(format!("{}={}", EnvVars::CONNECTION_TIMEOUT, timeout));
        }
        if let Some(ref command) = self.browser_command {
            summary.push(format!("{}={}", EnvVars::BROWSER_COMMAND, command));
        }
        if let Some(open) = self.open_tab {
            summary.push(format!("{}={}", EnvVars::OPEN_TAB, open));
        }

        summary
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
