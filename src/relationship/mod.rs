//! Relationship expressions between packages (depends, recommends, conflicts...).
//!
//! A relationship is either a [`DirectRelationship`] naming one package with
//! optional version bounds, or an any-of group where satisfying one child is
//! enough.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModError;
use crate::package::Package;
use crate::version::{PackageVersion, UnmanagedVersion};

/// A relationship naming a single package, optionally version-bounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectRelationship {
    pub name: String,
    pub version: Option<PackageVersion>,
    pub min_version: Option<PackageVersion>,
    pub max_version: Option<PackageVersion>,
    pub suppress_recommendations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRelationship", into = "RawRelationship")]
pub enum Relationship {
    Direct(DirectRelationship),
    AnyOf {
        any_of: Vec<Relationship>,
        choice_help_text: Option<String>,
    },
}

/// What satisfied a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfier<'p> {
    Package(&'p Package),
    Manual,
    Dlc,
}

impl<'p> Satisfier<'p> {
    pub fn package(&self) -> Option<&'p Package> {
        match self {
            Satisfier::Package(p) => Some(p),
            _ => None,
        }
    }
}

/// Things on disk that satisfy relationships without being managed packages.
#[derive(Debug, Clone, Copy)]
pub struct Unmanaged<'a> {
    pub manual: &'a BTreeSet<String>,
    pub dlc: &'a BTreeMap<String, UnmanagedVersion>,
}

impl DirectRelationship {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            min_version: None,
            max_version: None,
            suppress_recommendations: false,
        }
    }

    pub fn exact(name: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            version: Some(version),
            ..Self::new(name)
        }
    }

    pub fn bounded(
        name: impl Into<String>,
        min_version: Option<PackageVersion>,
        max_version: Option<PackageVersion>,
    ) -> Self {
        Self {
            min_version,
            max_version,
            ..Self::new(name)
        }
    }

    pub fn within_bounds(&self, version: &PackageVersion) -> bool {
        if let Some(exact) = &self.version {
            return exact == version;
        }
        self.min_version.as_ref().is_none_or(|min| min <= version)
            && self.max_version.as_ref().is_none_or(|max| max >= version)
    }

    /// Unknown versions satisfy every bound.
    pub fn within_unmanaged_bounds(&self, version: &UnmanagedVersion) -> bool {
        version.as_known().is_none_or(|v| self.within_bounds(v))
    }

    /// True if `package` is the named package within bounds, or provides the name.
    pub fn matches_package(&self, package: &Package) -> bool {
        (package.identifier == self.name && self.within_bounds(&package.version))
            || package.provides.iter().any(|p| *p == self.name)
    }

    fn satisfier<'p>(&self, candidates: &[&'p Package], unmanaged: Unmanaged<'_>) -> Option<Satisfier<'p>> {
        if unmanaged.manual.contains(&self.name) {
            return Some(Satisfier::Manual);
        }
        if let Some(p) = candidates
            .iter()
            .find(|p| p.identifier == self.name && self.within_bounds(&p.version))
        {
            return Some(Satisfier::Package(p));
        }
        if let Some(p) = candidates
            .iter()
            .find(|p| p.provides.iter().any(|name| *name == self.name))
        {
            return Some(Satisfier::Package(p));
        }
        match unmanaged.dlc.get(&self.name) {
            Some(version) if self.within_unmanaged_bounds(version) => Some(Satisfier::Dlc),
            _ => None,
        }
    }
}

impl Relationship {
    pub fn direct(name: impl Into<String>) -> Self {
        Relationship::Direct(DirectRelationship::new(name))
    }

    pub fn any_of(children: Vec<Relationship>) -> Self {
        Relationship::AnyOf {
            any_of: children,
            choice_help_text: None,
        }
    }

    /// First thing among `candidates` and `unmanaged` that satisfies this relationship.
    pub fn satisfier<'p>(
        &self,
        candidates: &[&'p Package],
        unmanaged: Unmanaged<'_>,
    ) -> Option<Satisfier<'p>> {
        match self {
            Relationship::Direct(direct) => direct.satisfier(candidates, unmanaged),
            Relationship::AnyOf { any_of, .. } => any_of
                .iter()
                .find_map(|child| child.satisfier(candidates, unmanaged)),
        }
    }

    pub fn satisfies(&self, candidates: &[&Package], unmanaged: Unmanaged<'_>) -> bool {
        self.satisfier(candidates, unmanaged).is_some()
    }

    pub fn matches_package(&self, package: &Package) -> bool {
        match self {
            Relationship::Direct(direct) => direct.matches_package(package),
            Relationship::AnyOf { any_of, .. } => any_of.iter().any(|r| r.matches_package(package)),
        }
    }

    /// Every package name mentioned, depth first.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Relationship::Direct(direct) => vec![direct.name.as_str()],
            Relationship::AnyOf { any_of, .. } => any_of.iter().flat_map(|r| r.names()).collect(),
        }
    }

    /// True if recommendations and suggestions should not be followed beneath this edge.
    pub fn suppresses_recommendations(&self) -> bool {
        match self {
            Relationship::Direct(direct) => direct.suppress_recommendations,
            Relationship::AnyOf { any_of, .. } => {
                any_of.iter().all(Relationship::suppresses_recommendations)
            }
        }
    }

    pub fn choice_help_text(&self) -> Option<&str> {
        match self {
            Relationship::Direct(_) => None,
            Relationship::AnyOf {
                choice_help_text, ..
            } => choice_help_text.as_deref(),
        }
    }
}

impl fmt::Display for DirectRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.version, &self.min_version, &self.max_version) {
            (Some(version), _, _) => write!(f, "{} {}", self.name, version),
            (None, Some(min), Some(max)) => write!(f, "{} {} -- {}", self.name, min, max),
            (None, Some(min), None) => write!(f, "{} {} or later", self.name, min),
            (None, None, Some(max)) => write!(f, "{} {} or earlier", self.name, max),
            (None, None, None) => write!(f, "{}", self.name),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Direct(direct) => direct.fmt(f),
            Relationship::AnyOf { any_of, .. } => {
                let text = any_of
                    .iter()
                    .map(Relationship::to_string)
                    .collect::<Vec<_>>()
                    .join(" OR ");
                write!(f, "{}", text)
            }
        }
    }
}

/// Wire form of a relationship; validated into [`Relationship`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawRelationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<PackageVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_version: Option<PackageVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_version: Option<PackageVersion>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    suppress_recommendations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    any_of: Option<Vec<Relationship>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    choice_help_text: Option<String>,
}

impl TryFrom<RawRelationship> for Relationship {
    type Error = ModError;

    fn try_from(raw: RawRelationship) -> Result<Self, Self::Error> {
        match (raw.any_of, raw.name) {
            (Some(_), Some(name)) => Err(ModError::metadata(
                None,
                format!("Relationship {} has both a name and any_of", name),
            )),
            (Some(any_of), None) => {
                if any_of.is_empty() {
                    return Err(ModError::metadata(None, "Empty any_of relationship"));
                }
                Ok(Relationship::AnyOf {
                    any_of,
                    choice_help_text: raw.choice_help_text,
                })
            }
            (None, Some(name)) => {
                if raw.version.is_some() && (raw.min_version.is_some() || raw.max_version.is_some()) {
                    return Err(ModError::metadata(
                        None,
                        format!(
                            "Relationship {} has both an exact version and min/max bounds",
                            name
                        ),
                    ));
                }
                Ok(Relationship::Direct(DirectRelationship {
                    name,
                    version: raw.version,
                    min_version: raw.min_version,
                    max_version: raw.max_version,
                    suppress_recommendations: raw.suppress_recommendations,
                }))
            }
            (None, None) => Err(ModError::metadata(
                None,
                "Relationship needs either a name or any_of",
            )),
        }
    }
}

impl From<Relationship> for RawRelationship {
    fn from(rel: Relationship) -> Self {
        match rel {
            Relationship::Direct(direct) => RawRelationship {
                name: Some(direct.name),
                version: direct.version,
                min_version: direct.min_version,
                max_version: direct.max_version,
                suppress_recommendations: direct.suppress_recommendations,
                ..Default::default()
            },
            Relationship::AnyOf {
                any_of,
                choice_help_text,
            } => RawRelationship {
                any_of: Some(any_of),
                choice_help_text,
                ..Default::default()
            },
        }
    }
}
