//! Address file shared with later launches of the same instance

use crate::error::{Result, RuntimeError};
use crate::utils::write_atomic;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persists the running worker's URL so a second launch can hand off to it
#[derive(Debug, Clone)]
pub struct AddressRegistry {
    path: PathBuf,
}

impl AddressRegistry {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the URL as a single owner-only line
    pub fn write(&self, url: &str) -> Result<()> {
        let line = format!("{}\n", url.trim());
        write_atomic(&self.path, line.as_bytes(), true).map_err(|e| {
            RuntimeError::instance(format!(
                "Failed to write address file {:?}: {}",
                self.path, e
            ))
        })?;
        info!("Server address recorded in {:?}", self.path);
        Ok(())
    }

    /// URL recorded by the running instance, `None` if missing or empty
    pub fn read(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content
                .lines()
                .next()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Cannot read address file {:?}: {}", self.path, e);
                }
                None
            }
        }
    }

    /// Delete the address file; failures are only logged
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed address file {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove address file {:?}: {}", self.path, e),
        }
    }

    /// Guard that removes the address file when dropped
    pub fn registration_guard(&self) -> AddressFileGuard {
        AddressFileGuard {
            registry: self.clone(),
        }
    }
}

/// Removes the address file on drop
///
/// Covers early returns and unwinding out of the supervisor.
#[derive(Debug)]
pub struct AddressFileGuard {
    registry: AddressRegistry,
}

impl Drop for AddressFileGuard {
    fn drop(&mut self) {
        self.registry.remove();
    }
}
