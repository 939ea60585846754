//! Startup reporting

pub mod logger;

pub use logger::{display_startup_banner, ServerLogPreamble, StartupLogger};
