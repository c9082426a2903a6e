//! Filesystem utilities.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Write a file atomically: stage into a temp file in the same directory,
/// then rename over the destination. A crash mid-write leaves either the
/// old file or the new one, never a truncated mix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for: {}", path.display()))?;
    ensure_dir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage temp file in: {}", parent.display()))?;
    std::io::Write::write_all(&mut tmp, contents)
        .with_context(|| format!("failed to write temp file for: {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace file: {}", path.display()))?;
    Ok(())
}

/// Write `contents` to `path` only if the on-disk bytes differ.
///
/// Returns true if the file was written. Unchanged files keep their mtime,
/// which downstream timestamp-based invalidation depends on.
pub fn write_if_different(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents.as_bytes() {
            return Ok(false);
        }
    }
    write_string(path, contents)?;
    Ok(true)
}

/// Last write time of a file, if it exists.
pub fn last_write_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Advance a file's mtime to now. Used when an emitted wrapper must not
/// appear older than the header it includes.
pub fn touch(path: &Path) -> Result<()> {
    let now = std::time::SystemTime::now();
    let file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open for touch: {}", path.display()))?;
    file.set_modified(now)
        .with_context(|| format!("failed to touch: {}", path.display()))?;
    Ok(())
}

/// Canonicalize a path, but don't fail if it doesn't exist yet.
/// Returns the path as-is if canonicalization fails.
pub fn normalize_path(path: &Path) -> std::path::PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> std::path::PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}
