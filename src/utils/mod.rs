//! Shared utilities for the runtime
//!
//! This module contains small helpers that are used across
//! multiple parts of the codebase to avoid duplication and ensure consistency.

pub mod fs;
pub mod name_sanitizer;

pub use fs::{open_append_owner_only, rotate_if_larger, sibling_with_suffix, write_atomic};
pub use name_sanitizer::sanitize_instance_component;
