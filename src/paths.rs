use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// Environment variable overriding the data root.
pub const ROOT_ENV: &str = "MODFORGE_ROOT";

/// Resolves the data root: an explicit path, then `MODFORGE_ROOT`, then the
/// default for the current user.
#[tracing::instrument(skip(runtime, explicit))]
pub fn data_root<R: Runtime + ?Sized>(runtime: &R, explicit: Option<PathBuf>) -> Result<PathBuf> {
    let root = match explicit {
        Some(path) => path,
        None => match runtime.env_var(ROOT_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => default_data_root(runtime)?,
        },
    };

    info!("Using data root: {}", root.display());
    Ok(root)
}

/// Get the default data root directory
#[tracing::instrument(skip(runtime))]
pub fn default_data_root<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(system_data_root())
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".modforge"))
    }
}

#[cfg(target_os = "macos")]
fn system_data_root() -> PathBuf {
    PathBuf::from("/opt/modforge")
}

#[cfg(target_os = "windows")]
fn system_data_root() -> PathBuf {
    PathBuf::from(r"C:\ProgramData\modforge")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn system_data_root() -> PathBuf {
    PathBuf::from("/usr/local/modforge")
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config.json")
}

pub fn catalog_path(root: &Path) -> PathBuf {
    root.join("catalog.json")
}

/// Cache location when the config does not name one.
pub fn default_cache_dir(root: &Path) -> PathBuf {
    root.join("cache")
}
