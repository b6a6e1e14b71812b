use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use log::debug;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::ops::Range;
use std::path::Path;
use tar::{Archive, EntryType};

use super::{ArchiveEntry, PackageArchive, clean_entry_name, with_implicit_dirs};

/// A .tar.gz package, decompressed into memory.
///
/// File contents are served as slices of the decompressed tar stream.
pub struct TarGzArchive {
    data: Vec<u8>,
    entries: Vec<ArchiveEntry>,
    spans: HashMap<String, Range<usize>>,
}

impl TarGzArchive {
    pub fn can_handle(archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }

    pub fn open<R: Runtime + ?Sized>(runtime: &R, archive_path: &Path) -> Result<Self> {
        let reader = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        let mut data = Vec::new();
        GzDecoder::new(reader)
            .read_to_end(&mut data)
            .with_context(|| format!("Failed to decompress archive {:?}", archive_path))?;
        Self::from_tar_bytes(data).with_context(|| format!("Failed to parse tar archive {:?}", archive_path))
    }

    fn from_tar_bytes(data: Vec<u8>) -> Result<Self> {
        let mut entries = Vec::new();
        let mut spans = HashMap::new();
        {
            let mut archive = Archive::new(Cursor::new(&data));
            for entry in archive.entries()? {
                let entry = entry?;
                let header = entry.header();
                let is_dir = match header.entry_type() {
                    EntryType::Directory => true,
                    EntryType::Regular | EntryType::Continuous => false,
                    other => {
                        debug!("Skipping tar entry of type {:?}", other);
                        continue;
                    }
                };
                let raw = entry.path()?.to_string_lossy().into_owned();
                let Some(name) = clean_entry_name(&raw) else {
                    debug!("Skipping entry with invalid path {:?}", raw);
                    continue;
                };
                let size = entry.size();
                if !is_dir {
                    let start = usize::try_from(entry.raw_file_position())?;
                    let end = start + usize::try_from(size)?;
                    if end > data.len() {
                        return Err(anyhow!("Truncated tar entry {:?}", name));
                    }
                    spans.insert(name.clone(), start..end);
                }
                entries.push(ArchiveEntry {
                    name,
                    size,
                    is_dir,
                    mode: header.mode().ok(),
                });
            }
        }

        Ok(Self {
            data,
            entries: with_implicit_dirs(entries),
            spans,
        })
    }
}

impl PackageArchive for TarGzArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let span = self
            .spans
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("No file {:?} in archive", name))?;
        Ok(Box::new(Cursor::new(&self.data[span])))
    }
}
