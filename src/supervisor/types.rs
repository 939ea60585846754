//! Supervisor Types
//!
//! Shared state and value types used by the supervisor and its components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Loopback host the worker binds
pub const WORKER_HOST: &str = "127.0.0.1";

/// States of the supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Init,
    GuardChecked,
    PortChosen,
    WorkerStarting,
    /// Retryable through reconfiguration
    WorkerStartFailed,
    HealthChecking,
    /// Fatal for the launch
    HealthCheckFailed,
    Registered,
    Ready,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Init => "init",
            SupervisorState::GuardChecked => "guard-checked",
            SupervisorState::PortChosen => "port-chosen",
            SupervisorState::WorkerStarting => "worker-starting",
            SupervisorState::WorkerStartFailed => "worker-start-failed",
            SupervisorState::HealthChecking => "health-checking",
            SupervisorState::HealthCheckFailed => "health-check-failed",
            SupervisorState::Registered => "registered",
            SupervisorState::Ready => "ready",
            SupervisorState::ShuttingDown => "shutting-down",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the worker handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    NotStarted,
    Running,
    Failed,
    ShuttingDown,
    Stopped,
}

/// Opaque token the worker requires on every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKey(String);

impl AuthKey {
    /// UUID v4 as 32 lowercase hex characters, no braces or dashes
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of the worker: `http://127.0.0.1:<port>/?key=<auth_key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    pub port: u16,
    pub key: AuthKey,
}

impl ServerUrl {
    pub fn new(port: u16, key: AuthKey) -> Self {
        Self { port, key }
    }
}

impl fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}/?key={}", WORKER_HOST, self.port, self.key)
    }
}

/// How a supervisor run ended without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another instance owns the worker; its URL was opened if known
    HandedOff { url: Option<String> },
    /// The worker ran and was shut down
    Shutdown,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        0
    }
}
