//! File-system helpers shared by the stores and the sources.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tempfile::NamedTempFile;
use tracing::warn;

/// Errors from an atomic write.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The temp file could not be created or written. The target is untouched.
    #[error("Temp write failed: {0}")]
    Temp(#[source] io::Error),

    /// The rename over the target failed. The prior target is intact.
    #[error("Rename failed: {0}")]
    Rename(#[source] io::Error),
}

/// Write `bytes` to `path` through a temp file in the same directory and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(WriteError::Temp)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(WriteError::Temp)?;
    tmp.write_all(bytes).map_err(WriteError::Temp)?;
    tmp.as_file().sync_all().map_err(WriteError::Temp)?;

    tmp.persist(path).map_err(|e| WriteError::Rename(e.error))?;
    Ok(())
}

/// Move `from` to `to`, replacing any existing file.
///
/// Falls back to copy and delete when a rename crosses file systems.
pub fn move_overwrite(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if to.exists() {
        std::fs::remove_file(to)?;
    }

    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Set a file's modification time to `published_at_sec`. Non-positive values are ignored.
pub fn stamp_mtime(path: &Path, published_at_sec: i64) -> io::Result<()> {
    if published_at_sec <= 0 {
        return Ok(());
    }

    let when = UNIX_EPOCH + Duration::from_secs(published_at_sec as u64);
    let file = File::options().write(true).open(path)?;
    file.set_modified(when)
}

/// Modification time of `path` in unix seconds.
pub fn mtime_sec(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs() as i64)
}

/// Delete a file, logging instead of failing. Returns true if it is gone.
pub fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete file");
            false
        }
    }
}

/// Remove a directory tree and recreate it empty.
pub fn reset_dir(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(dir)
}

/// Current unix time in seconds.
pub fn now_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
