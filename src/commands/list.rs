use anyhow::Result;
use log::debug;

use crate::index::{PackageIndex, Registry};

use super::Session;

/// List installed packages, manually installed binaries and DLC
#[tracing::instrument(skip(session))]
pub fn list(session: &Session) -> Result<()> {
    let registry = session.load_registry()?;
    let lines = installed_lines(&registry);
    if lines.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    debug!("Found {} entries", lines.len());
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn installed_lines(registry: &Registry) -> Vec<String> {
    let mut records = registry.installed_packages();
    records.sort_by(|a, b| a.identifier().cmp(b.identifier()));

    let mut lines: Vec<String> = records
        .iter()
        .map(|record| {
            let marker = if record.auto_installed { " (auto)" } else { "" };
            format!("{} {}{}", record.identifier(), record.package.version, marker)
        })
        .collect();
    for (identifier, path) in registry.manual_binaries() {
        lines.push(format!("{} (manually installed at {})", identifier, path));
    }
    for (identifier, version) in registry.dlc() {
        match version.0 {
            Some(version) => lines.push(format!("{} {} (DLC)", identifier, version)),
            None => lines.push(format!("{} (DLC)", identifier)),
        }
    }
    lines
}
