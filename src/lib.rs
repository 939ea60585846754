//! webapp-runtime - local supervisor for a desktop web application
//!
//! This crate starts the application's web server as a child worker, checks
//! that it answers, records its address for later launches and opens the
//! browser at it. A second launch for the same user and executable hands off
//! to the running instance instead of starting another worker.

pub mod config;
pub mod error;
pub mod instance;
pub mod startup;
pub mod supervisor;
pub mod utils;

pub use config::{ConfigStore, ServerConfig};
pub use error::{Result, RuntimeError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name used for per-user directories and instance files
pub const APP_NAME: &str = "webapp-runtime";
