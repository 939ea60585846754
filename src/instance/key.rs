//! Instance identity and the per-instance file layout

use crate::error::{Result, RuntimeError};
use crate::utils::sanitize_instance_component;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Number of hex characters of the executable path hash kept in the key
const EXE_HASH_LEN: usize = 16;

/// Identity that namespaces every cross-process resource of the runtime
///
/// Two launches with the same key share one worker. Different users, or
/// different installed copies of the executable, never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    app: String,
    user: String,
    exe_hash: String,
}

impl InstanceKey {
    /// Build a key for the current user and running executable
    pub fn detect(app_name: &str) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| RuntimeError::instance(format!("Cannot locate executable: {}", e)))?;
        let exe = exe.canonicalize().unwrap_or(exe);
        let key = Self::new(app_name, &current_user_name(), &exe);
        debug!("Instance key for {:?}: {}", exe, key.stem());
        Ok(key)
    }

    /// Build a key from explicit parts
    pub fn new(app_name: &str, user_name: &str, exe_path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(exe_path.to_string_lossy().as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self {
            app: sanitize_instance_component(app_name),
            user: sanitize_instance_component(user_name),
            exe_hash: digest[..EXE_HASH_LEN].to_string(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn exe_hash(&self) -> &str {
        &self.exe_hash
    }

    /// `<app>-<user>-<hash>`, the common prefix of every instance file
    pub fn stem(&self) -> String {
        format!("{}-{}-{}", self.app, self.user, self.exe_hash)
    }
}

/// Locations of the files owned by one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    pub dir: PathBuf,
    /// Cross-process lock serializing the running check
    pub lock_file: PathBuf,
    /// Owner marker, locked by the running instance for its lifetime
    pub owner_marker: PathBuf,
    pub address_file: PathBuf,
    pub startup_log: PathBuf,
    pub server_log: PathBuf,
}

impl InstancePaths {
    /// Paths in the default per-user data directory, or `data_dir` if given
    pub fn new(key: &InstanceKey, data_dir: Option<&Path>) -> Self {
        let dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_data_dir(key.app()),
        };
        Self::in_dir(key, dir)
    }

    /// Paths inside an explicit directory
    pub fn in_dir<P: Into<PathBuf>>(key: &InstanceKey, dir: P) -> Self {
        let dir = dir.into();
        let stem = key.stem();
        let file = |suffix: &str| dir.join(format!("{}.{}", stem, suffix));

        Self {
            lock_file: file("sema"),
            owner_marker: file("shmem"),
            address_file: file("addr"),
            startup_log: file("startup.log"),
            server_log: file("server.log"),
            dir,
        }
    }

    /// Create the directory with owner-only permissions where supported
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            RuntimeError::instance(format!("Cannot create data directory {:?}: {}", self.dir, e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
            {
                warn!("Could not restrict permissions on {:?}: {}", self.dir, e);
            }
        }

        Ok(())
    }
}

fn default_data_dir(app: &str) -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join(app),
        None => {
            warn!("Could not determine data directory, using temporary directory");
            std::env::temp_dir().join(app)
        }
    }
}

/// Current user name from the OS, with environment fallbacks
fn current_user_name() -> String {
    let name = whoami::username();
    if !name.trim().is_empty() {
        return name;
    }

    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
