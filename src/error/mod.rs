//! Error handling module for the runtime supervisor
//!
//! This module provides the error type shared by every component.

mod error;

// Re-export the main error types
pub use error::{Result, RuntimeError};
