mod installable;
mod tar_gz;
mod zip;

use crate::runtime::Runtime;
use anyhow::{Result, anyhow};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

pub use installable::{InstallableFile, dll_identifier, find_installable_files};
pub use tar_gz::TarGzArchive;
pub use zip::ZipPackageArchive;

/// One entry of a package archive. Names use `/` and carry no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Unix permission bits, when the archive records them.
    pub mode: Option<u32>,
}

/// Random access to the files of a downloaded package.
pub trait PackageArchive: Send {
    /// Every entry, including directories only implied by file paths.
    fn entries(&self) -> &[ArchiveEntry];

    /// Opens a file entry for reading.
    fn read_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>>;

    fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries().iter().find(|e| e.name == name)
    }
}

/// True if `path` names an archive format this crate can read.
pub fn can_handle(path: &Path) -> bool {
    TarGzArchive::can_handle(path) || ZipPackageArchive::can_handle(path)
}

/// Opens the archive at `path`, picking the reader from its extension.
#[tracing::instrument(skip(runtime))]
pub fn open_archive<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Box<dyn PackageArchive>> {
    if TarGzArchive::can_handle(path) {
        return Ok(Box::new(TarGzArchive::open(runtime, path)?));
    }
    if ZipPackageArchive::can_handle(path) {
        return Ok(Box::new(ZipPackageArchive::open(runtime, path)?));
    }
    Err(anyhow!("Unsupported archive format: {}", path.display()))
}

/// Normalizes an archive member name, or `None` for names that would escape
/// the extraction root.
fn clean_entry_name(raw: &str) -> Option<String> {
    let name = raw.replace('\\', "/");
    let name = name.trim_start_matches("./").trim_matches('/');
    if name.is_empty() {
        return None;
    }
    if name
        .split('/')
        .any(|part| part == ".." || part.is_empty() || part.contains(':'))
    {
        return None;
    }
    Some(name.to_string())
}

/// Adds directory entries for every parent that only appears implicitly.
fn with_implicit_dirs(mut entries: Vec<ArchiveEntry>) -> Vec<ArchiveEntry> {
    let known: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.is_dir)
        .map(|e| e.name.clone())
        .collect();
    let mut implied = BTreeSet::new();
    for entry in &entries {
        let mut rest = entry.name.as_str();
        while let Some((parent, _)) = rest.rsplit_once('/') {
            if !known.contains(parent) {
                implied.insert(parent.to_string());
            }
            rest = parent;
        }
    }
    entries.extend(implied.into_iter().map(|name| ArchiveEntry {
        name,
        size: 0,
        is_dir: true,
        mode: None,
    }));
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
