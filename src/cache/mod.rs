//! Download cache: archives keyed by package release.

mod directory;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::package::Package;

pub use directory::{DirectoryCache, sha256_file};

#[cfg_attr(test, mockall::automock)]
pub trait Cache: Send + Sync {
    fn is_cached(&self, package: &Package) -> bool;

    /// Path of the cached archive, if present.
    fn cached_path(&self, package: &Package) -> Option<PathBuf>;

    /// Moves a finished download into the cache, verifying its size and
    /// sha256 when the package declares them.
    fn store(&self, package: &Package, downloaded: &Path) -> Result<PathBuf>;

    /// Where a download of `package` is written while in flight.
    fn in_progress_path(&self, package: &Package) -> PathBuf;

    /// Bytes of a partial download on disk; 0 if there is none.
    fn in_progress_size(&self, package: &Package) -> u64;

    fn total_size(&self) -> Result<u64>;

    /// Deletes archives, least recently modified first, until the cache fits
    /// in `limit` bytes. Archives of `protected` packages are never deleted.
    /// Returns the number of bytes freed.
    fn enforce_size_limit(&self, limit: u64, protected: &[Package]) -> Result<u64>;
}
