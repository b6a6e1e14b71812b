//! The set of game versions an instance accepts packages for.

use serde::{Deserialize, Serialize};

use super::game_version::GameVersion;
use super::range::GameVersionRange;

/// Game versions a package may target to count as compatible.
///
/// An empty set accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameVersionCriteria {
    versions: Vec<GameVersion>,
}

impl GameVersionCriteria {
    pub fn new(versions: Vec<GameVersion>) -> Self {
        Self { versions }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn versions(&self) -> &[GameVersion] {
        &self.versions
    }

    /// Union of every member's expanded range.
    pub fn effective_range(&self) -> GameVersionRange {
        self.versions
            .iter()
            .map(GameVersion::to_range)
            .reduce(|acc, range| acc.union(&range))
            .unwrap_or_else(GameVersionRange::unbounded)
    }

    /// True if `range` overlaps any accepted version.
    pub fn accepts(&self, range: &GameVersionRange) -> bool {
        self.versions.is_empty()
            || self
                .versions
                .iter()
                .any(|v| v.to_range().intersect(range).is_some())
    }
}

impl std::fmt::Display for GameVersionCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.versions.is_empty() {
            return write!(f, "any");
        }
        let text = self
            .versions
            .iter()
            .map(GameVersion::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}", text)
    }
}
