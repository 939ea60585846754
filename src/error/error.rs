//! Error types and handling for the runtime supervisor

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Main error type for the runtime supervisor
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration errors (entry file not found, invalid settings)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Single-instance guard errors (lock or marker could not be created)
    #[error("Instance error: {message}")]
    Instance { message: String },

    /// Port allocation errors
    #[error("Port error: {message}")]
    Port { message: String },

    /// Worker startup errors
    #[error("Worker error: {message}")]
    Worker { message: String },

    /// Health check failures
    #[error("Health check error: {message}")]
    HealthCheck { message: String },

    /// Browser launch errors
    #[error("Browser error: {message}")]
    Browser { message: String },

    /// The user cancelled reconfiguration
    #[error("Startup cancelled by the user")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an instance guard error
    pub fn instance<S: Into<String>>(message: S) -> Self {
        Self::Instance {
            message: message.into(),
        }
    }

    /// Create a port allocation error
    pub fn port<S: Into<String>>(message: S) -> Self {
        Self::Port {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker<S: Into<String>>(message: S) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Create a health check error
    pub fn health_check<S: Into<String>>(message: S) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Create a browser launch error
    pub fn browser<S: Into<String>>(message: S) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    /// Check if this error can be recovered by reconfiguring and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::Config { .. } | RuntimeError::Worker { .. })
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::Config { .. } => "config",
            RuntimeError::Instance { .. } => "instance",
            RuntimeError::Port { .. } => "port",
            RuntimeError::Worker { .. } => "worker",
            RuntimeError::HealthCheck { .. } => "health_check",
            RuntimeError::Browser { .. } => "browser",
            RuntimeError::Cancelled => "cancelled",
            RuntimeError::Io(_) => "io",
            RuntimeError::Serde(_) => "serialization",
            RuntimeError::Yaml(_) => "yaml",
            RuntimeError::Http(_) => "http",
            RuntimeError::Url(_) => "url",
            RuntimeError::Internal(_) => "internal",
        }
    }

    /// Process exit code to use when this error ends the run
    pub fn exit_code(&self) -> i32 {
        1
    }
}
