//! Version algebra: package release versions and game compatibility versions.

mod criteria;
mod game_version;
mod package_version;
mod range;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use criteria::GameVersionCriteria;
pub use game_version::GameVersion;
pub use package_version::PackageVersion;
pub use range::GameVersionRange;

/// Version of something present on disk but not managed by a package,
/// such as a DLC or a manually installed binary. `None` means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnmanagedVersion(pub Option<PackageVersion>);

impl UnmanagedVersion {
    pub fn unknown() -> Self {
        Self(None)
    }

    pub fn known(version: PackageVersion) -> Self {
        Self(Some(version))
    }

    pub fn as_known(&self) -> Option<&PackageVersion> {
        self.0.as_ref()
    }
}

impl fmt::Display for UnmanagedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(version) => write!(f, "{}", version),
            None => write!(f, "(unknown)"),
        }
    }
}
