//! Typed hooks between the supervisor and the user-facing layer

use crate::config::ServerConfig;
use crate::error::RuntimeError;
use crate::supervisor::types::SupervisorState;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Events the supervisor reports to the user-facing layer
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Logs are worth looking at (enables "view log" / "configure")
    DiagnosticsAvailable { server_log: PathBuf },
    /// A third of the health-check budget passed without an answer
    SlowStartup { elapsed: Duration },
    /// Two thirds of the health-check budget passed
    AlmostReady { elapsed: Duration },
    /// The worker did not survive its start; reconfiguration follows
    WorkerStartFailed { message: String },
    /// The worker answers health checks at `url`
    Ready { url: String },
    /// Browser could not be opened; the worker keeps running
    BrowserFailed { message: String },
    /// Another instance is running; this launch hands off to it
    HandedOff { url: Option<String> },
    /// Unrecoverable failure, the process is about to exit
    Fatal { message: String },
}

/// Receives supervisor state changes and events
///
/// All methods default to doing nothing.
pub trait RuntimeObserver: Send + Sync {
    fn state_changed(&self, _from: SupervisorState, _to: SupervisorState) {}

    fn on_event(&self, _event: &RuntimeEvent) {}
}

/// Answer of a reconfiguration request
#[derive(Debug, Clone, PartialEq)]
pub enum ReconfigureOutcome {
    /// Retry with this configuration
    Accepted(ServerConfig),
    /// The user gave up; the launch fails
    Cancelled,
}

/// Blocking configuration dialog shown after a failed worker start
pub trait Reconfigurer: Send {
    fn reconfigure(&mut self, current: &ServerConfig, error: &RuntimeError) -> ReconfigureOutcome;
}

/// Observer that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RuntimeObserver for LoggingObserver {
    fn state_changed(&self, from: SupervisorState, to: SupervisorState) {
        info!("Supervisor state: {} -> {}", from, to);
    }

    fn on_event(&self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::DiagnosticsAvailable { server_log } => {
                info!("Worker output is logged to {:?}", server_log)
            }
            RuntimeEvent::SlowStartup { elapsed } => {
                warn!("Worker still starting after {:.1}s", elapsed.as_secs_f64())
            }
            RuntimeEvent::AlmostReady { elapsed } => {
                warn!("Worker not answering after {:.1}s", elapsed.as_secs_f64())
            }
            RuntimeEvent::WorkerStartFailed { message } => error!("Worker failed to start: {}", message),
            RuntimeEvent::Ready { url } => info!("🚀 Server ready at {}", url),
            RuntimeEvent::BrowserFailed { message } => warn!("Browser launch failed: {}", message),
            RuntimeEvent::HandedOff { url: Some(url) } => {
                info!("Handing off to running instance at {}", url)
            }
            RuntimeEvent::HandedOff { url: None } => {
                warn!("Another instance is running but its address is unknown")
            }
            RuntimeEvent::Fatal { message } => error!("❌ {}", message),
        }
    }
}

/// Reconfigurer for unattended runs; every failure ends the launch
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelReconfigurer;

impl Reconfigurer for CancelReconfigurer {
    fn reconfigure(&mut self, _current: &ServerConfig, error: &RuntimeError) -> ReconfigureOutcome {
        warn!("No interactive configuration available after: {}", error);
        ReconfigureOutcome::Cancelled
    }
}
