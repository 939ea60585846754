//! Startup logging: banner, resolved configuration and the worker log preamble

use crate::config::{ConfigStore, ServerConfig};
use crate::instance::{InstanceKey, InstancePaths};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Startup logger for the resolved runtime setup
pub struct StartupLogger;

impl StartupLogger {
    /// Display the resolved configuration and instance layout
    pub fn display_startup_info(
        store: &ConfigStore,
        config: &ServerConfig,
        key: &InstanceKey,
        paths: &InstancePaths,
        version: &str,
    ) {
        info!("🚀 webapp-runtime v{} starting...", version);
        info!("");

        Self::display_configuration_resolution(store);

        if store.env_overrides().has_overrides() {
            Self::display_environment_overrides(store);
        }

        if !store.cli_overrides().is_empty() {
            Self::display_cli_overrides(store);
        }

        Self::display_server_settings(config);
        Self::display_instance(key, paths);
    }

    fn display_configuration_resolution(store: &ConfigStore) {
        info!("📁 Configuration Resolution:");
        if store.path().exists() {
            info!("   Config file: {:?} ✅", store.path());
        } else {
            info!("   Config file: built-in defaults ({:?} not found)", store.path());
        }
        info!("");
    }

    fn display_environment_overrides(store: &ConfigStore) {
        info!("🔧 Environment Overrides:");
        for override_info in store.env_overrides().get_override_summary() {
            info!("   ✅ {}", override_info);
        }
        info!("");
    }

    fn display_cli_overrides(store: &ConfigStore) {
        let cli = store.cli_overrides();
        info!("🔧 Command Line Overrides:");
        if let Some(port) = cli.port {
            info!("   ✅ --port {}", port);
        }
        if cli.no_browser {
            info!("   ✅ --no-browser");
        }
        info!("");
    }

    fn display_server_settings(config: &ServerConfig) {
        info!("🎯 Worker Settings:");
        if config.fixed_port {
            info!("   Port: {} (fixed)", config.port_number);
        } else {
            info!("   Port: ephemeral");
        }
        info!("   Entry file: {}", config.entry_file);
        if !config.worker_search_paths.is_empty() {
            info!("   Application paths: {}", config.worker_search_paths.join(", "));
        }
        info!(
            "   Interpreter: {}",
            config.interpreter.as_deref().unwrap_or("auto-detect")
        );
        info!("   Connection timeout: {}s", config.connection_timeout_seconds);
        match config.browser_command() {
            Some(command) => info!("   Browser: {}", command),
            None => info!("   Browser: system default"),
        }
        info!(
            "   Open tab at startup: {}",
            if config.auto_open_on_start { "yes" } else { "no" }
        );

        for warning in config.warnings() {
            warn!("   ⚠️  {}", warning);
        }
        info!("");
    }

    fn display_instance(key: &InstanceKey, paths: &InstancePaths) {
        info!("🌐 Instance:");
        info!("   Key: {}", key.stem());
        info!("   Data directory: {:?}", paths.dir);
        info!("   Server log: {:?}", paths.server_log);
        info!("");
    }
}

/// Header written to the server log before each worker start
#[derive(Debug, Clone)]
pub struct ServerLogPreamble {
    pub interpreter: PathBuf,
    pub entry_file: PathBuf,
    pub module_path: Vec<PathBuf>,
    pub command: Vec<String>,
}

impl ServerLogPreamble {
    pub fn new(interpreter: &Path, entry_file: &Path) -> Self {
        Self {
            interpreter: interpreter.to_path_buf(),
            entry_file: entry_file.to_path_buf(),
            module_path: Vec::new(),
            command: Vec::new(),
        }
    }

    pub fn with_module_path(mut self, module_path: Vec<PathBuf>) -> Self {
        self.module_path = module_path;
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "----------------------------------------------------------------")?;
        writeln!(
            out,
            "Starting worker at {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %z")
        )?;
        writeln!(out, "Interpreter: {}", self.interpreter.display())?;
        writeln!(out, "Entry file: {}", self.entry_file.display())?;
        if self.module_path.is_empty() {
            writeln!(out, "Module path: (interpreter default)")?;
        } else {
            writeln!(out, "Module path:")?;
            for dir in &self.module_path {
                writeln!(out, "    {}", dir.display())?;
            }
        }
        writeln!(out, "Command: {}", self.command.join(" "))?;
        writeln!(out, "----------------------------------------------------------------")?;
        out.flush()
    }
}

/// Display startup banner with version information
pub fn display_startup_banner(version: &str) {
    info!("");
    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                    webapp-runtime v{:<10}                ║", version);
    info!("║            Local web application supervisor                  ║");
    info!("╚══════════════════════════════════════════════════════════════╝");
    info!("");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_lists_launch_details() {
        let preamble = ServerLogPreamble::new(Path::new("/usr/bin/python3"), Path::new("/srv/web/server.py"))
            .with_module_path(vec![PathBuf::from("/srv/venv/lib/python3.11/site-packages")])
            .with_command(vec![
                "/usr/bin/python3".to_string(),
                "-s".to_string(),
                "/srv/web/server.py".to_string(),
            ]);

        let mut buffer = Vec::new();
        preamble.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("Starting worker at "));
        assert!(text.contains("Interpreter: /usr/bin/python3"));
        assert!(text.contains("Entry file: /srv/web/server.py"));
        assert!(text.contains("    /srv/venv/lib/python3.11/site-packages"));
        assert!(text.contains("Command: /usr/bin/python3 -s /srv/web/server.py"));
    }
}
