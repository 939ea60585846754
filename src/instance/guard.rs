//! Cross-process single instance detection
//!
//! Two files per instance key stand in for a named semaphore and a named
//! shared memory segment:
//!
//! - the lock file is locked exclusively while a launch checks for a running
//!   owner and, if there is none, becomes the owner
//! - the owner marker is held under an exclusive lock by the owning process
//!   for as long as its [`InstanceLease`] lives
//!
//! Advisory locks are released by the OS when a process dies, so a marker left
//! behind by a crash is detectable as "present but unlocked".

use crate::error::{Result, RuntimeError};
use crate::instance::{AddressRegistry, InstancePaths};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of [`SingleInstanceGuard::acquire`]
#[derive(Debug)]
pub enum Acquisition {
    /// This process owns the instance until the lease is dropped
    Acquired(InstanceLease),
    /// Another process owns the instance; `url` is its recorded address, if any
    AlreadyRunning { url: Option<String> },
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired(_))
    }
}

/// Ownership of the instance; released on drop
#[derive(Debug)]
pub struct InstanceLease {
    marker: File,
    marker_path: PathBuf,
}

impl InstanceLease {
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.marker_path) {
            debug!("Could not remove owner marker {:?}: {}", self.marker_path, e);
        }
        if let Err(e) = self.marker.unlock() {
            debug!("Could not unlock owner marker {:?}: {}", self.marker_path, e);
        }
        debug!("Released instance lease {:?}", self.marker_path);
    }
}

/// Detects another running instance with the same key
pub struct SingleInstanceGuard;

impl SingleInstanceGuard {
    /// Check for a running owner and become the owner if there is none
    ///
    /// The check and the creation of the owner marker happen under the lock
    /// file, so concurrent launches cannot both conclude "not running".
    pub fn acquire(paths: &InstancePaths, registry: &AddressRegistry) -> Result<Acquisition> {
        paths.ensure_dir()?;

        let lock = open_rw(&paths.lock_file)?;
        lock.lock_exclusive().map_err(|e| {
            RuntimeError::instance(format!("Cannot lock {:?}: {}", paths.lock_file, e))
        })?;

        let result = Self::acquire_locked(paths, registry);

        if let Err(e) = lock.unlock() {
            warn!("Failed to unlock {:?}: {}", paths.lock_file, e);
        }
        result
    }

    fn acquire_locked(paths: &InstancePaths, registry: &AddressRegistry) -> Result<Acquisition> {
        #[cfg(not(windows))]
        reclaim_stale_marker(&paths.owner_marker);

        if owner_is_alive(&paths.owner_marker) {
            let url = registry.read();
            match url {
                Some(ref url) => info!("Another instance is running at {}", url),
                None => warn!(
                    "Another instance is running but {:?} has no address yet",
                    registry.path()
                ),
            }
            return Ok(Acquisition::AlreadyRunning { url });
        }

        let mut marker = open_rw(&paths.owner_marker)?;
        marker.try_lock_exclusive().map_err(|e| {
            RuntimeError::instance(format!(
                "Cannot take ownership of {:?}: {}",
                paths.owner_marker, e
            ))
        })?;

        marker.set_len(0)?;
        writeln!(marker, "{}", std::process::id())?;
        marker.flush()?;

        info!("Acquired instance lease {:?}", paths.owner_marker);
        Ok(Acquisition::Acquired(InstanceLease {
            marker,
            marker_path: paths.owner_marker.clone(),
        }))
    }
}

/// True when the marker exists and its owner still holds it
fn owner_is_alive(marker_path: &Path) -> bool {
    let marker = match OpenOptions::new().read(true).open(marker_path) {
        Ok(file) => file,
        Err(_) => return false,
    };

    match marker.try_lock_shared() {
        Ok(()) => {
            let _ = marker.unlock();
            debug!("Owner marker {:?} exists but nobody holds it", marker_path);
            false
        }
        Err(_) => true,
    }
}

/// Delete a marker left behind by a crashed owner; errors are ignored
#[cfg(not(windows))]
fn reclaim_stale_marker(marker_path: &Path) {
    let Ok(marker) = OpenOptions::new().read(true).open(marker_path) else {
        return;
    };

    if marker.try_lock_exclusive().is_ok() {
        if std::fs::remove_file(marker_path).is_ok() {
            info!("Reclaimed stale owner marker {:?}", marker_path);
        }
        let _ = marker.unlock();
    }
}

fn open_rw(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .map_err(|e| RuntimeError::instance(format!("Cannot open {:?}: {}", path, e)))
}
