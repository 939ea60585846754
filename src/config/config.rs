//! Configuration management for the runtime supervisor

use crate::config::environment::EnvironmentOverrides;
use crate::error::{Result, RuntimeError};
use crate::utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default configuration file name inside the per-user config directory
pub const DEFAULT_CONFIG_FILE: &str = "runtime_config.json";

// Default functions for serde
fn default_port_number() -> u16 {
    5050
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-s".to_string()]
}

fn default_entry_file() -> String {
    "server.py".to_string()
}

fn default_connection_timeout() -> u64 {
    90
}

fn default_auto_open() -> bool {
    true
}

fn default_ping_path() -> String {
    "/misc/ping".to_string()
}

fn default_shutdown_path() -> String {
    "/misc/shutdown".to_string()
}

fn default_startup_grace_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_log_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_log_keep_files() -> usize {
    3
}

/// Worker server configuration as persisted in the runtime settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Use `port_number` instead of an OS-assigned ephemeral port
    #[serde(rename = "FixedPort", default)]
    pub fixed_port: bool,
    /// Port to bind when `fixed_port` is set
    #[serde(rename = "PortNumber", default = "default_port_number")]
    pub port_number: u16,
    /// User-configured directories searched for the worker entry file
    #[serde(rename = "ApplicationPath", default)]
    pub worker_search_paths: Vec<String>,
    /// Extra module search directories handed to the interpreter
    #[serde(rename = "PythonPath", default)]
    pub python_path: Vec<String>,
    /// Interpreter executable (bundled environment or PATH lookup when unset)
    #[serde(rename = "Interpreter", default)]
    pub interpreter: Option<String>,
    /// Arguments placed before the entry file on the interpreter command line
    #[serde(rename = "InterpreterArgs", default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// Name of the worker launch file
    #[serde(rename = "EntryFile", default = "default_entry_file")]
    pub entry_file: String,
    /// Browser command line; `%URL%` is replaced by the server URL
    #[serde(rename = "BrowserCommand", default)]
    pub browser_launch_command: Option<String>,
    /// Seconds to wait for the worker to answer health checks
    #[serde(rename = "ConnectionTimeout", default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    /// Open a browser tab once the worker is ready
    #[serde(rename = "OpenTabAtStartup", default = "default_auto_open")]
    pub auto_open_on_start: bool,
    /// Health endpoint path
    #[serde(rename = "PingPath", default = "default_ping_path")]
    pub ping_path: String,
    /// Shutdown endpoint path
    #[serde(rename = "ShutdownPath", default = "default_shutdown_path")]
    pub shutdown_path: String,
    /// Grace period after start before sampling for early failure
    #[serde(rename = "StartupGraceMs", default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Bounded wait for the worker to exit after the shutdown request
    #[serde(rename = "ShutdownGraceSecs", default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Server log size that triggers rotation
    #[serde(rename = "LogMaxBytes", default = "default_log_max_bytes")]
    pub log_max_bytes: u64,
    /// Number of rotated server logs kept
    #[serde(rename = "LogKeepFiles", default = "default_log_keep_files")]
    pub log_keep_files: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fixed_port: false,
            port_number: default_port_number(),
            worker_search_paths: Vec::new(),
            python_path: Vec::new(),
            interpreter: None,
            interpreter_args: default_interpreter_args(),
            entry_file: default_entry_file(),
            browser_launch_command: None,
            connection_timeout_seconds: default_connection_timeout(),
            auto_open_on_start: default_auto_open(),
            ping_path: default_ping_path(),
            shutdown_path: default_shutdown_path(),
            startup_grace_ms: default_startup_grace_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_max_bytes: default_log_max_bytes(),
            log_keep_files: default_log_keep_files(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Result<()> {
        if self.fixed_port && self.port_number == 0 {
            return Err(RuntimeError::config(
                "PortNumber cannot be 0 when FixedPort is enabled",
            ));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(RuntimeError::config("ConnectionTimeout cannot be 0"));
        }

        if self.connection_timeout_seconds > 3600 {
            return Err(RuntimeError::config(format!(
                "ConnectionTimeout {} seconds is too high. Maximum allowed is 3600 seconds (1 hour)",
                self.connection_timeout_seconds
            )));
        }

        if self.entry_file.trim().is_empty() {
            return Err(RuntimeError::config("EntryFile cannot be empty"));
        }

        for (name, path) in [("PingPath", &self.ping_path), ("ShutdownPath", &self.shutdown_path)] {
            if !path.starts_with('/') {
                return Err(RuntimeError::config(format!(
                    "{} must start with '/', got '{}'",
                    name, path
                )));
            }
        }

        Ok(())
    }

    /// Non-fatal observations about the configuration
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.fixed_port && self.port_number < 1024 {
            warnings.push(format!(
                "PortNumber {} is in the reserved range (<1024), the worker may not be able to bind it",
                self.port_number
            ));
        }

        if let Some(command) = self.browser_command() {
            if !command.contains("%URL%") {
                warnings.push(format!(
                    "BrowserCommand '{}' does not contain the %URL% placeholder, the server URL will not be passed to it",
                    command
                ));
            }
        }

        if self.startup_grace_ms == 0 {
            warnings.push(
                "StartupGraceMs is 0, early worker failures will only be caught by the health check"
                    .to_string(),
            );
        }

        warnings
    }

    /// Browser command with surrounding whitespace removed, if one is set
    pub fn browser_command(&self) -> Option<&str> {
        self.browser_launch_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }

    /// Apply command line overrides (highest precedence)
    pub fn apply_cli_overrides(&mut self, port: Option<u16>, no_browser: bool) {
        if let Some(port) = port {
            self.fixed_port = true;
            self.port_number = port;
        }
        if no_browser {
            self.auto_open_on_start = false;
        }
    }
}

/// Serialization format of the settings file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Overrides given on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--port`, implies a fixed port
    pub port: Option<u16>,
    /// `--no-browser`
    pub no_browser: bool,
}

impl CliOverrides {
    pub fn is_empty(&self) -> bool {
        self.port.is_none() && !self.no_browser
    }
}

/// Owner of the persisted settings file
///
/// The store is the only place that reads or writes the file. The supervisor
/// receives a [`ServerConfig`] value and asks the store to persist a new one
/// only at the reconfiguration transition. Environment and command line
/// overrides are layered on every load and never written back.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    env_overrides: EnvironmentOverrides,
    cli_overrides: CliOverrides,
}

impl ConfigStore {
    /// Resolve the settings file location and environment overrides
    ///
    /// Priority: CLI path, then `WEBAPP_RUNTIME_CONFIG_PATH`, then the per-user
    /// config directory.
    pub fn resolve(app_name: &str, cli_path: Option<&Path>) -> Result<Self> {
        EnvironmentOverrides::load_env_file();
        let env_overrides = EnvironmentOverrides::load()?;

        let path = if let Some(path) = cli_path {
            debug!("Using CLI-specified config path: {:?}", path);
            path.to_path_buf()
        } else if let Some(ref path) = env_overrides.config_path {
            debug!("Using environment config path: {:?}", path);
            path.clone()
        } else {
            Self::default_path(app_name)
        };

        Ok(Self {
            path,
            env_overrides,
            cli_overrides: CliOverrides::default(),
        })
    }

    /// Create a store for an explicit file without environment overrides
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            env_overrides: EnvironmentOverrides::default(),
            cli_overrides: CliOverrides::default(),
        }
    }

    /// Replace the environment overrides applied on load
    pub fn with_env_overrides(mut self, overrides: EnvironmentOverrides) -> Self {
        self.env_overrides = overrides;
        self
    }

    /// Command line overrides applied on load after the environment ones
    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        self.cli_overrides = overrides;
        self
    }

    /// Default settings path in the per-user config directory
    pub fn default_path(app_name: &str) -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join(app_name).join(DEFAULT_CONFIG_FILE),
            None => {
                warn!("Could not determine config directory, using current directory");
                PathBuf::from(DEFAULT_CONFIG_FILE)
            }
        }
    }

    /// Path of the settings file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Environment overrides applied on every load
    pub fn env_overrides(&self) -> &EnvironmentOverrides {
        &self.env_overrides
    }

    /// Command line overrides applied on every load
    pub fn cli_overrides(&self) -> &CliOverrides {
        &self.cli_overrides
    }

    /// Load the effective configuration: file values (defaults when the file
    /// does not exist), then environment, then command line overrides
    pub fn load(&self) -> Result<ServerConfig> {
        let mut config = self.load_file()?;
        self.env_overrides.apply_to_config(&mut config);
        config.apply_cli_overrides(self.cli_overrides.port, self.cli_overrides.no_browser);
        config.validate()?;
        Ok(config)
    }

    /// Values stored in the settings file, without any overrides
    pub fn load_file(&self) -> Result<ServerConfig> {
        if !self.path.exists() {
            info!("Config file {:?} not found, using defaults", self.path);
            return Ok(ServerConfig::default());
        }

        info!("Loading configuration from: {:?}", self.path);
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            RuntimeError::config(format!("Failed to read config file {:?}: {}", self.path, e))
        })?;
        self.parse(&content)
    }

    /// Re-read the settings file after it was edited externally
    pub fn reload(&self) -> Result<ServerConfig> {
        debug!("Reloading configuration from {:?}", self.path);
        self.load()
    }

    /// Persist the configuration atomically
    ///
    /// Fields controlled by an active environment or command line override
    /// keep the value currently stored in the file.
    pub fn save(&self, config: &ServerConfig) -> Result<()> {
        config.validate()?;
        let persisted = self.without_overrides(config)?;

        let content = match ConfigFormat::for_path(&self.path) {
            ConfigFormat::Json => serde_json::to_string_pretty(&persisted)?,
            ConfigFormat::Yaml => serde_yaml::to_string(&persisted)?,
        };

        write_atomic(&self.path, content.as_bytes(), false)?;
        info!("Saved configuration to {:?}", self.path);
        Ok(())
    }

    fn without_overrides(&self, config: &ServerConfig) -> Result<ServerConfig> {
        let env = &self.env_overrides;
        let cli = &self.cli_overrides;
        let overrides_port = env.port.is_some() || cli.port.is_some();
        let overrides_open_tab = env.open_tab.is_some() || cli.no_browser;
        let overrides_timeout = env.connection_timeout.is_some();
        let overrides_browser = env.browser_command.is_some();

        let mut persisted = config.clone();
        if !(overrides_port || overrides_open_tab || overrides_timeout || overrides_browser) {
            return Ok(persisted);
        }

        let stored = self.load_file()?;
        if overrides_port {
            debug!("Not persisting overridden port settings");
            persisted.fixed_port = stored.fixed_port;
            persisted.port_number = stored.port_number;
        }
        if overrides_open_tab {
            persisted.auto_open_on_start = stored.auto_open_on_start;
        }
        if overrides_timeout {
            persisted.connection_timeout_seconds = stored.connection_timeout_seconds;
        }
        if overrides_browser {
            persisted.browser_launch_command = stored.browser_launch_command;
        }
        Ok(persisted)
    }

    fn parse(&self, content: &str) -> Result<ServerConfig> {
        // An empty file is treated like a missing one
        if content.trim().is_empty() {
            return Ok(ServerConfig::default());
        }

        match ConfigFormat::for_path(&self.path) {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| {
                RuntimeError::config(format!("Failed to parse config file {:?}: {}", self.path, e))
            }),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                RuntimeError::config(format!("Failed to parse config file {:?}: {}", self.path, e))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.fixed_port);
        assert_eq!(config.port_number, 5050);
        assert_eq!(config.connection_timeout_seconds, 90);
        assert!(config.auto_open_on_start);
    }

    #[test]
    fn test_persisted_key_names() {
        let json = r#"{"FixedPort": true, "PortNumber": 8080, "ApplicationPath": ["/opt/app/web"], "BrowserCommand": "firefox %URL%", "ConnectionTimeout": 30, "OpenTabAtStartup": false}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();

        assert!(config.fixed_port);
        assert_eq!(config.port_number, 8080);
        assert_eq!(config.worker_search_paths, vec!["/opt/app/web".to_string()]);
        assert_eq!(config.browser_command(), Some("firefox %URL%"));
        assert_eq!(config.connection_timeout_seconds, 30);
        assert!(!config.auto_open_on_start);
        // Unspecified keys fall back to defaults
        assert_eq!(config.entry_file, "server.py");
        assert_eq!(config.ping_path, "/misc/ping");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.fixed_port = true;
        config.port_number = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.connection_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.ping_path = "misc/ping".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_browser_command_without_placeholder_only_warns() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runtime_config.json");
        std::fs::write(&path, r#"{"BrowserCommand": "firefox --new-window"}"#).unwrap();

        let config = ConfigStore::at(&path).load().unwrap();
        assert_eq!(config.browser_command(), Some("firefox --new-window"));
        assert!(config
            .warnings()
            .iter()
            .any(|w| w.contains("BrowserCommand")));
        assert!(ServerConfig::default().warnings().is_empty());
    }

    #[test]
    fn test_save_keeps_file_values_under_environment_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runtime_config.json");
        std::fs::write(&path, r#"{"FixedPort": false, "OpenTabAtStartup": true}"#).unwrap();

        let store = ConfigStore::at(&path).with_env_overrides(EnvironmentOverrides {
            port: Some(7070),
            open_tab: Some(false),
            ..Default::default()
        });
        let mut config = store.load().unwrap();
        assert!(config.fixed_port);
        assert_eq!(config.port_number, 7070);
        assert!(!config.auto_open_on_start);

        config.worker_search_paths = vec!["/srv/web".to_string()];
        store.save(&config).unwrap();

        let stored = ConfigStore::at(&path).load().unwrap();
        assert!(!stored.fixed_port);
        assert_eq!(stored.port_number, 5050);
        assert!(stored.auto_open_on_start);
        assert_eq!(stored.worker_search_paths, vec!["/srv/web".to_string()]);

        // The overrides still apply on the next load
        let reloaded = store.reload().unwrap();
        assert!(reloaded.fixed_port);
        assert_eq!(reloaded.port_number, 7070);
    }

    #[test]
    fn test_save_keeps_file_values_under_cli_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runtime_config.json");

        let store = ConfigStore::at(&path).with_cli_overrides(CliOverrides {
            port: Some(6060),
            no_browser: true,
        });
        let mut config = store.load().unwrap();
        assert_eq!(config.port_number, 6060);
        assert!(!config.auto_open_on_start);

        config.connection_timeout_seconds = 30;
        store.save(&config).unwrap();

        let stored = ConfigStore::at(&path).load().unwrap();
        assert!(!stored.fixed_port);
        assert!(stored.auto_open_on_start);
        assert_eq!(stored.connection_timeout_seconds, 30);
    }

    #[test]
    fn test_cli_port_override_implies_fixed_port() {
        let mut config = ServerConfig::default();
        config.apply_cli_overrides(Some(6060), true);
        assert!(config.fixed_port);
        assert_eq!(config.port_number, 6060);
        assert!(!config.auto_open_on_start);
    }

    #[test]
    fn test_save_and_load_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::at(temp_dir.path().join("runtime.yaml"));

        let mut config = ServerConfig::default();
        config.fixed_port = true;
        config.port_number = 5151;
        config.worker_search_paths = vec!["/srv/web".to_string()];
        store.save(&config).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("FixedPort: true"));
        assert_eq!(store.reload().unwrap(), config);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runtime_config.json");
        std::fs::write(&path, "  \n").unwrap();

        let config = ConfigStore::at(&path).load().unwrap();
        assert_eq!(config, ServerConfig::default());
    }
}
