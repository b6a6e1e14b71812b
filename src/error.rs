//! Error taxonomy for resolution and install failures.
//!
//! Operations return `anyhow::Result`; domain failures are raised as [`ModError`]
//! values so callers can classify them with `downcast_ref::<ModError>()`.

use std::path::PathBuf;

use thiserror::Error;

use crate::package::Package;

#[derive(Debug, Error)]
pub enum ModError {
    #[error("Bad metadata{}: {reason}", describe_package(.package))]
    Metadata {
        package: Option<String>,
        reason: String,
    },

    #[error(
        "Not enough space in {}: need {}, only {} available",
        .path.display(),
        format_size_ref(.required),
        format_size_ref(.available)
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("{} not found or not compatible with this instance", describe_unsatisfied(.relationship, .parent))]
    Unsatisfiable {
        relationship: String,
        parent: Option<String>,
    },

    #[error("Too many packages provide {requested}: {}", join_identifiers(.candidates))]
    AmbiguousProvider {
        requested: String,
        candidates: Vec<Package>,
    },

    #[error("Inconsistent package set:{}", describe_inconsistencies(.unmet, .conflicts))]
    Inconsistent {
        unmet: Vec<String>,
        conflicts: Vec<String>,
    },

    #[error("{package} is not in the download cache")]
    NotCached { package: String },

    #[error(
        "{installing} wants to write {}, which already exists{}",
        .path.display(),
        describe_owner(.owner)
    )]
    FileConflict {
        path: PathBuf,
        installing: String,
        owner: Option<String>,
    },

    #[error(
        "{identifier} is manually installed at {}, outside the folders this package installs to",
        .path.display()
    )]
    LocationMismatch { identifier: String, path: PathBuf },

    #[error("Could not delete files of {package}: {}", join_paths(.files))]
    DeletionFailure { package: String, files: Vec<PathBuf> },

    #[error("{identifier} is not installed")]
    NotInstalled { identifier: String },

    #[error("{identifier} is a DLC and cannot be installed or removed here")]
    IsDlc { identifier: String },

    #[error("Cancelled{}", describe_reason(.reason))]
    Cancelled { reason: Option<String> },
}

impl ModError {
    pub fn metadata(package: Option<&str>, reason: impl Into<String>) -> Self {
        ModError::Metadata {
            package: package.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        ModError::Cancelled {
            reason: Some(reason.into()),
        }
    }

    /// True for a deliberate user or token stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ModError::Cancelled { .. })
    }
}

/// Finds a [`ModError`] anywhere in an error chain.
pub fn find_mod_error(err: &anyhow::Error) -> Option<&ModError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ModError>())
}

/// Human readable byte count, e.g. `1.5 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_size_ref(bytes: &u64) -> String {
    format_size(*bytes)
}

fn describe_reason(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}

fn describe_package(package: &Option<String>) -> String {
    package
        .as_ref()
        .map(|p| format!(" in {}", p))
        .unwrap_or_default()
}

fn describe_unsatisfied(relationship: &str, parent: &Option<String>) -> String {
    match parent {
        Some(parent) => format!("{} (required by {})", relationship, parent),
        None => relationship.to_string(),
    }
}

fn describe_owner(owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!(" and belongs to {}", owner),
        None => " and is not owned by any package".to_string(),
    }
}

fn describe_inconsistencies(unmet: &[String], conflicts: &[String]) -> String {
    unmet
        .iter()
        .chain(conflicts.iter())
        .map(|line| format!("\n  - {}", line))
        .collect()
}

fn join_identifiers(candidates: &[Package]) -> String {
    candidates
        .iter()
        .map(|p| p.identifier.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
