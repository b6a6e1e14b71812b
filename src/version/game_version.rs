//! Game compatibility versions (`major.minor.patch.build`, each part optional).

use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::range::GameVersionRange;
use crate::error::ModError;

static GAME_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+)(?:\.(\d+)(?:\.(\d+))?)?)?$").expect("valid game version regex")
});

/// A game version where each trailing component may be undefined.
///
/// An undefined component is not zero: `1.2` stands for every `1.2.x.y`.
/// The fully undefined value is [`GameVersion::ANY`].
///
/// The derived ordering is only meaningful between fully defined versions;
/// partial versions should be compared through [`GameVersion::to_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GameVersion {
    major: Option<u32>,
    minor: Option<u32>,
    patch: Option<u32>,
    build: Option<u32>,
}

impl GameVersion {
    pub const ANY: GameVersion = GameVersion {
        major: None,
        minor: None,
        patch: None,
        build: None,
    };

    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            patch: Some(patch),
            build: Some(build),
        }
    }

    pub fn major(&self) -> Option<u32> {
        self.major
    }

    pub fn minor(&self) -> Option<u32> {
        self.minor
    }

    pub fn patch(&self) -> Option<u32> {
        self.patch
    }

    pub fn build(&self) -> Option<u32> {
        self.build
    }

    pub fn is_any(&self) -> bool {
        self.major.is_none()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.build.is_some()
    }

    fn defined_parts(&self) -> Vec<u32> {
        [self.major, self.minor, self.patch, self.build]
            .into_iter()
            .map_while(|part| part)
            .collect()
    }

    fn from_parts(parts: &[u32]) -> Self {
        let part = |i: usize| parts.get(i).copied();
        Self {
            major: part(0),
            minor: part(1),
            patch: part(2),
            build: part(3),
        }
    }

    /// Fills undefined components with zero.
    fn padded(parts: &[u32]) -> Self {
        let part = |i: usize| Some(parts.get(i).copied().unwrap_or(0));
        Self {
            major: part(0),
            minor: part(1),
            patch: part(2),
            build: part(3),
        }
    }

    /// Expands this version into the range of concrete versions it stands for.
    ///
    /// `1.2` becomes `[1.2.0.0, 1.3.0.0)`, `1.2.3.4` the single point
    /// `[1.2.3.4, 1.2.3.4]` and `any` the unbounded range.
    pub fn to_range(&self) -> GameVersionRange {
        let parts = self.defined_parts();
        if parts.is_empty() {
            return GameVersionRange::unbounded();
        }
        if parts.len() == 4 {
            return GameVersionRange::new(Bound::Included(*self), Bound::Included(*self));
        }

        let lower = Self::padded(&parts);
        let mut next = parts.clone();
        if let Some(last) = next.last_mut() {
            *last = last.saturating_add(1);
        }
        let upper = Self::padded(&next);
        GameVersionRange::new(Bound::Included(lower), Bound::Excluded(upper))
    }
}

impl FromStr for GameVersion {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(GameVersion::ANY);
        }
        let caps = GAME_VERSION_RE
            .captures(s)
            .ok_or_else(|| ModError::metadata(None, format!("Invalid game version: {:?}", s)))?;

        let mut parts = Vec::with_capacity(4);
        for m in caps.iter().skip(1).map_while(|m| m) {
            let value = m.as_str().parse::<u32>().map_err(|e| {
                ModError::metadata(None, format!("Invalid game version {:?}: {}", s, e))
            })?;
            parts.push(value);
        }
        Ok(Self::from_parts(&parts))
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.defined_parts();
        if parts.is_empty() {
            return write!(f, "any");
        }
        let text = parts
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{}", text)
    }
}

impl Serialize for GameVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GameVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gv(s: &str) -> GameVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(gv("1").major(), Some(1));
        assert_eq!(gv("1").minor(), None);
        assert_eq!(gv("1.2.3.4"), GameVersion::new(1, 2, 3, 4));
        assert!(gv("any").is_any());
        assert!(gv("ANY").is_any());
        assert_eq!(gv("1.12.5").to_string(), "1.12.5");
        assert_eq!(GameVersion::ANY.to_string(), "any");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "1.", "1.2.3.4.5", "a.b", "1..2", "-1"] {
            let err = bad.parse::<GameVersion>().unwrap_err();
            assert!(matches!(err, ModError::Metadata { .. }), "{:?}", bad);
        }
    }

    #[test]
    fn test_partial_version_expands_to_prefix_range() {
        let range = gv("1.2").to_range();
        assert!(range.contains(&GameVersion::new(1, 2, 3, 4)));
        assert!(range.contains(&GameVersion::new(1, 2, 0, 0)));
        assert!(!range.contains(&GameVersion::new(1, 3, 0, 0)));
        assert!(!range.contains(&GameVersion::new(1, 1, 99, 0)));
    }

    #[test]
    fn test_full_version_is_a_point() {
        let range = gv("1.2.3.4").to_range();
        assert!(range.contains(&GameVersion::new(1, 2, 3, 4)));
        assert!(!range.contains(&GameVersion::new(1, 2, 3, 5)));
    }

    #[test]
    fn test_any_contains_everything() {
        let range = GameVersion::ANY.to_range();
        assert!(range.contains(&GameVersion::new(0, 0, 0, 0)));
        assert!(range.contains(&gv("1.12")));
    }

    #[test]
    fn test_serde_as_string() {
        let version: GameVersion = serde_json::from_str("\"1.12\"").unwrap();
        assert_eq!(version, gv("1.12"));
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"1.12\"");
        assert!(serde_json::from_str::<GameVersion>("\"1.x\"").is_err());
    }
}
