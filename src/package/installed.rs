//! Records of packages installed into an instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Package;

/// An installed release and the files it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPackageRecord {
    pub package: Package,
    /// Paths relative to the instance root, with forward slashes.
    pub files: Vec<String>,
    /// Directories created for this package; may be shared with other packages.
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub auto_installed: bool,
    pub instance: String,
    pub install_time: DateTime<Utc>,
}

impl InstalledPackageRecord {
    pub fn new(
        package: Package,
        files: Vec<String>,
        directories: Vec<String>,
        auto_installed: bool,
        instance: &str,
    ) -> Self {
        Self {
            package,
            files: normalize_all(files),
            directories: normalize_all(directories),
            auto_installed,
            instance: instance.to_string(),
            install_time: Utc::now(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.package.identifier
    }

    pub fn owns(&self, relative_path: &str) -> bool {
        self.files.iter().any(|f| f == relative_path)
    }
}

fn normalize_all(paths: Vec<String>) -> Vec<String> {
    let mut paths: Vec<String> = paths.iter().map(|p| normalize_relative(p)).collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Forward slashes, no leading `./` or `/`, no trailing `/`.
pub fn normalize_relative(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches("./").trim_start_matches('/');
    path.trim_end_matches('/').to_string()
}
