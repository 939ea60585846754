//! File helpers shared by the config store, address registry and worker log

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Write `contents` to `path` through a uniquely named temporary sibling
///
/// The temporary file is created exclusively in the target directory, synced,
/// then renamed over `path`. With `owner_only` the result is readable and
/// writable by the owner alone (Unix mode 0600), otherwise 0644.
pub fn write_atomic(path: &Path, contents: &[u8], owner_only: bool) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if owner_only { 0o600 } else { 0o644 };
        temp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    temp.as_file_mut().write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Rotate `path` to `path.1`, shifting older copies up to `keep` files
///
/// Returns true when a rotation happened.
pub fn rotate_if_larger(path: &Path, max_bytes: u64, keep: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if size <= max_bytes {
        return Ok(false);
    }

    if keep == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = sibling_with_suffix(path, &keep.to_string());
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..keep).rev() {
        let from = sibling_with_suffix(path, &index.to_string());
        if from.exists() {
            fs::rename(&from, sibling_with_suffix(path, &(index + 1).to_string()))?;
        }
    }
    fs::rename(path, sibling_with_suffix(path, "1"))?;
    Ok(true)
}

/// Open a file for appending, creating it owner-only if needed
pub fn open_append_owner_only(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

/// `file.ext` -> `file.ext.<suffix>`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
