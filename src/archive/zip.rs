use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use super::{ArchiveEntry, PackageArchive, clean_entry_name, with_implicit_dirs};

/// A .zip package held in memory.
pub struct ZipPackageArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
}

impl ZipPackageArchive {
    pub fn can_handle(archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".zip")
    }

    pub fn open<R: Runtime + ?Sized>(runtime: &R, archive_path: &Path) -> Result<Self> {
        let mut reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        // zip needs Read + Seek, but Runtime::open only gives Read
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        Self::from_bytes(buffer).with_context(|| format!("Failed to parse ZIP archive {:?}", archive_path))
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(buffer))?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut index = HashMap::new();
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            if entry.enclosed_name().is_none() {
                debug!("Skipping entry with invalid path {:?}", entry.name());
                continue;
            }
            let Some(name) = clean_entry_name(entry.name()) else {
                debug!("Skipping entry with invalid path {:?}", entry.name());
                continue;
            };
            if !entry.is_dir() {
                index.insert(name.clone(), i);
            }
            entries.push(ArchiveEntry {
                name,
                size: entry.size(),
                is_dir: entry.is_dir(),
                mode: entry.unix_mode(),
            });
        }

        Ok(Self {
            archive,
            entries: with_implicit_dirs(entries),
            index,
        })
    }
}

impl PackageArchive for ZipPackageArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| anyhow!("No file {:?} in archive", name))?;
        let entry = self
            .archive
            .by_index(i)
            .with_context(|| format!("Failed to read ZIP entry {:?}", name))?;
        Ok(Box::new(entry))
    }
}
