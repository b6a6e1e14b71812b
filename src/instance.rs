//! Game instances and the directory layout of the game they hold.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ModError;
use crate::index::STATE_DIR;
use crate::package::ReleaseStatus;
use crate::runtime::{relative_to_root, resolve_under_root};
use crate::version::GameVersionCriteria;

/// `install_to` value meaning the instance root itself.
pub const GAME_ROOT: &str = "GameRoot";

/// Where a game keeps its mods and which of its directories must survive cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    /// Default `install_to` and the home of `GameData/<sub>` destinations.
    pub primary_dir: String,
    /// `install_to` names mapped to paths relative to the instance root.
    pub install_roots: BTreeMap<String, String>,
    /// Directories never removed during uninstall cleanup.
    pub reserved_dirs: Vec<String>,
    /// Folder names whose unowned leftovers may be deleted on uninstall.
    pub auto_remove_dirs: Vec<String>,
}

impl Default for GameProfile {
    fn default() -> Self {
        let install_roots = [
            ("Tutorial", "saves/training"),
            ("Scenarios", "saves/scenarios"),
            ("Missions", "Missions"),
            ("Ships", "Ships"),
            ("Ships/VAB", "Ships/VAB"),
            ("Ships/SPH", "Ships/SPH"),
            ("Ships/@thumbs", "Ships/@thumbs"),
            ("Ships/@thumbs/VAB", "Ships/@thumbs/VAB"),
            ("Ships/@thumbs/SPH", "Ships/@thumbs/SPH"),
            ("Ships/Script", "Ships/Script"),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_string(), path.to_string()))
        .collect();

        let reserved_dirs = [
            "GameData",
            "Ships",
            "Ships/VAB",
            "Ships/SPH",
            "Ships/@thumbs",
            "Ships/@thumbs/VAB",
            "Ships/@thumbs/SPH",
            "Ships/Script",
            "Missions",
            "Scenarios",
            "Tutorial",
            "saves/scenarios",
            "saves/training",
            STATE_DIR,
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            primary_dir: "GameData".to_string(),
            install_roots,
            reserved_dirs,
            auto_remove_dirs: vec!["@thumbs".to_string()],
        }
    }
}

impl GameProfile {
    /// Resolves a stanza's `install_to` to a path relative to the instance
    /// root. `GameRoot` resolves to the empty string.
    pub fn install_to(&self, package: &str, install_to: &str) -> Result<String, ModError> {
        let target = install_to.replace('\\', "/");
        let target = target.trim_matches('/');

        if target == GAME_ROOT {
            return Ok(String::new());
        }
        if target == self.primary_dir {
            return Ok(self.primary_dir.clone());
        }
        if let Some(sub) = target
            .strip_prefix(self.primary_dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if sub.is_empty() || sub.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
                return Err(ModError::metadata(
                    Some(package),
                    format!("invalid install_to {:?}", install_to),
                ));
            }
            return Ok(format!("{}/{}", self.primary_dir, sub));
        }
        self.install_roots.get(target).cloned().ok_or_else(|| {
            ModError::metadata(
                Some(package),
                format!("unknown install_to {:?}", install_to),
            )
        })
    }

    /// True for the instance root and the game's own directories.
    pub fn is_reserved(&self, relative_dir: &str) -> bool {
        let dir = relative_dir.trim_matches('/');
        dir.is_empty() || self.reserved_dirs.iter().any(|r| r.eq_ignore_ascii_case(dir))
    }

    /// True if any component of the path is an auto-removable folder name.
    pub fn is_auto_removable(&self, relative_path: &str) -> bool {
        relative_path.split('/').any(|part| {
            self.auto_remove_dirs
                .iter()
                .any(|name| name.eq_ignore_ascii_case(part))
        })
    }
}

/// One installation of the game that packages are installed into.
#[derive(Debug, Clone)]
pub struct GameInstance {
    pub name: String,
    pub root: PathBuf,
    pub profile: GameProfile,
    pub criteria: GameVersionCriteria,
    /// Destinations containing any of these substrings are never installed.
    pub install_filters: Vec<String>,
    pub stability_tolerance: ReleaseStatus,
}

impl GameInstance {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            profile: GameProfile::default(),
            criteria: GameVersionCriteria::any(),
            install_filters: Vec::new(),
            stability_tolerance: ReleaseStatus::Stable,
        }
    }

    pub fn with_criteria(mut self, criteria: GameVersionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_install_filters(mut self, filters: Vec<String>) -> Self {
        self.install_filters = filters;
        self
    }

    /// `<root>/.modforge`
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Absolute path for an instance-relative path, or `None` if it escapes.
    pub fn to_absolute(&self, relative: &str) -> Option<PathBuf> {
        resolve_under_root(&self.root, relative)
    }

    /// Instance-relative form of an absolute path under the root.
    pub fn to_relative(&self, path: &Path) -> Option<String> {
        relative_to_root(&self.root, path)
    }
}
