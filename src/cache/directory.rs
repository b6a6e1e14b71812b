use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::Cache;
use crate::error::format_size;
use crate::package::Package;
use crate::runtime::Runtime;

/// Subdirectory holding partial downloads.
const STAGING_DIR: &str = "downloading";

/// Buffer size for hashing archives (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Cache stored as flat files named by [`Package::cache_file_name`].
pub struct DirectoryCache<R: Runtime> {
    runtime: R,
    dir: PathBuf,
}

impl<R: Runtime> DirectoryCache<R> {
    pub fn new(runtime: R, dir: PathBuf) -> Self {
        Self { runtime, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, package: &Package) -> PathBuf {
        self.dir.join(package.cache_file_name())
    }

    /// Cached archives with their size and modification time.
    fn archives(&self) -> Result<Vec<(PathBuf, u64, SystemTime)>> {
        if !self.runtime.exists(&self.dir) {
            return Ok(Vec::new());
        }
        let mut archives = Vec::new();
        for path in self
            .runtime
            .read_dir(&self.dir)
            .with_context(|| format!("Failed to list cache directory {:?}", self.dir))?
        {
            if self.runtime.is_dir(&path) {
                continue;
            }
            let size = self.runtime.file_identity(&path)?.size;
            let modified = self.runtime.modified(&path)?;
            archives.push((path, size, modified));
        }
        Ok(archives)
    }
}

/// Lowercase hex sha256 of a file.
pub fn sha256_file<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<String> {
    let mut reader = runtime
        .open(path)
        .with_context(|| format!("Failed to open {:?} for hashing", path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl<R: Runtime> Cache for DirectoryCache<R> {
    fn is_cached(&self, package: &Package) -> bool {
        self.runtime.exists(&self.path_for(package))
    }

    fn cached_path(&self, package: &Package) -> Option<PathBuf> {
        let path = self.path_for(package);
        self.runtime.exists(&path).then_some(path)
    }

    #[tracing::instrument(skip(self, package), fields(package = %package))]
    fn store(&self, package: &Package, downloaded: &Path) -> Result<PathBuf> {
        if let Some(expected) = package.download_size {
            let actual = self.runtime.file_identity(downloaded)?.size;
            if actual != expected {
                return Err(anyhow!(
                    "Download of {} has the wrong size: expected {} bytes, got {}",
                    package,
                    expected,
                    actual
                ));
            }
        }
        if let Some(expected) = package.download_hash.as_ref().and_then(|h| h.sha256.as_ref()) {
            let actual = sha256_file(&self.runtime, downloaded)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(anyhow!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    package,
                    expected.to_lowercase(),
                    actual
                ));
            }
        }

        let target = self.path_for(package);
        self.runtime
            .create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {:?}", self.dir))?;
        self.runtime
            .rename(downloaded, &target)
            .with_context(|| format!("Failed to move {:?} into the cache", downloaded))?;
        debug!("Cached {} at {:?}", package, target);
        Ok(target)
    }

    fn in_progress_path(&self, package: &Package) -> PathBuf {
        self.dir
            .join(STAGING_DIR)
            .join(format!("{}.part", package.cache_file_name()))
    }

    fn in_progress_size(&self, package: &Package) -> u64 {
        self.runtime
            .file_identity(&self.in_progress_path(package))
            .map(|identity| identity.size)
            .unwrap_or(0)
    }

    fn total_size(&self) -> Result<u64> {
        Ok(self.archives()?.iter().map(|(_, size, _)| size).sum())
    }

    #[tracing::instrument(skip(self, protected))]
    fn enforce_size_limit(&self, limit: u64, protected: &[Package]) -> Result<u64> {
        let mut archives = self.archives()?;
        let mut total: u64 = archives.iter().map(|(_, size, _)| size).sum();
        if total <= limit {
            return Ok(0);
        }

        let keep: BTreeSet<PathBuf> = protected.iter().map(|p| self.path_for(p)).collect();
        archives.sort_by_key(|(_, _, modified)| *modified);

        let mut freed = 0;
        for (path, size, _) in archives {
            if total <= limit {
                break;
            }
            if keep.contains(&path) {
                continue;
            }
            self.runtime
                .remove_file(&path)
                .with_context(|| format!("Failed to evict {:?} from the cache", path))?;
            info!("Evicted {:?} ({}) from the cache", path, format_size(size));
            total -= size;
            freed += size;
        }
        Ok(freed)
    }
}
