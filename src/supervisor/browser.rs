//! Opening the worker URL in a browser

use crate::error::{Result, RuntimeError};
use std::process::{Child, Command, Stdio};
use tracing::{debug, error, info};

/// Placeholder replaced by the server URL in a configured browser command
pub const URL_PLACEHOLDER: &str = "%URL%";

/// Opens URLs with the configured command or the system default browser
#[derive(Debug, Clone, Default)]
pub struct BrowserLauncher {
    command: Option<String>,
}

impl BrowserLauncher {
    pub fn new(command: Option<&str>) -> Self {
        Self {
            command: command
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
                .map(str::to_string),
        }
    }

    /// Open `url`; the launched browser is not waited for
    pub fn open(&self, url: &str) -> Result<()> {
        match self.command {
            Some(ref command) => Self::spawn_command(command, url).map(|_| ()),
            None => {
                info!("🌐 Opening browser at {}", url);
                webbrowser::open(url).map_err(|e| {
                    error!("Failed to open browser: {}", e);
                    RuntimeError::browser(format!("Failed to open the default browser: {}", e))
                })
            }
        }
    }

    /// Command line with `%URL%` substituted, split into program and arguments
    pub fn command_line(command: &str, url: &str) -> Result<Vec<String>> {
        let args = shell_words::split(command).map_err(|e| {
            RuntimeError::browser(format!("Invalid browser command '{}': {}", command, e))
        })?;
        Ok(args
            .into_iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, url))
            .collect())
    }

    /// Run the configured command and return the browser process id
    fn spawn_command(command: &str, url: &str) -> Result<u32> {
        let args = Self::command_line(command, url)?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| RuntimeError::browser("Browser command is empty"))?;

        info!("🌐 Opening browser with command: {}", args.join(" "));
        Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(Self::reap_in_background)
            .map_err(|e| {
                error!("Failed to run browser command {:?}: {}", program, e);
                RuntimeError::browser(format!("Failed to run browser command '{}': {}", command, e))
            })
    }

    /// Wait for the launched browser on a detached thread so it is not left as a zombie
    fn reap_in_background(mut child: Child) -> u32 {
        let pid = child.id();
        let spawned = std::thread::Builder::new()
            .name("webapp-browser-reaper".to_string())
            .spawn(move || match child.wait() {
                Ok(status) => debug!("Browser command {} exited with {}", pid, status),
                Err(e) => debug!("Failed to wait for browser command {}: {}", pid, e),
            });
        if let Err(e) = spawned {
            debug!("Could not start browser reaper thread: {}", e);
        }
        pid
    }
}
