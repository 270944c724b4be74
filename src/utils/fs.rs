//! Paths the pipeline reads from and writes to.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "positionbook";

/// Create `dir` (and its parents) unless it already exists as a directory.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        bail!("{} exists and is not a directory", dir.display());
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {}", dir.display()))
}

/// Make sure the directory a file will be written into exists.
pub fn ensure_parent_dir(file: &Path) -> Result<()> {
    match file.parent().filter(|p| !p.as_os_str().is_empty()) {
        | Some(parent) => ensure_dir(parent),
        | None => Ok(()),
    }
}

/// Per-user data directory (`~/.local/share/positionbook` on Linux).
pub fn app_data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("Could not locate the user data directory")?;
    let dir = base.join(APP_DIR);
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Audit database used when the configuration names none.
pub fn default_audit_db_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join("risk_audit.db"))
}

/// Files in `dir` ending in `.{extension}`, sorted. A missing directory is empty.
pub fn list_files_with_extension<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
