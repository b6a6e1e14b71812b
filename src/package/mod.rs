//! Package descriptors as they appear in the catalog.

mod installed;
mod stanza;

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModError;
use crate::relationship::Relationship;
use crate::version::{GameVersion, GameVersionCriteria, GameVersionRange, PackageVersion};

pub use installed::{InstalledPackageRecord, normalize_relative};
pub use stanza::InstallStanza;

/// Newest metadata format this crate understands.
pub const SUPPORTED_SPEC_VERSION: &str = "1.34";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Package,
    Metapackage,
    Dlc,
}

/// Release channel, ordered from most to least stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    #[default]
    Stable,
    Testing,
    Development,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHash {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Where an archive comes from and what it should look like.
#[derive(Debug, Clone, Copy)]
pub struct DownloadDescriptor<'a> {
    pub urls: &'a [String],
    pub size: Option<u64>,
    pub hash: Option<&'a DownloadHash>,
}

/// A single release of a package.
///
/// Identity is `(identifier, version)`: two values with the same pair compare
/// and hash equal regardless of the rest of their metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    #[serde(
        default,
        deserialize_with = "deserialize_spec_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub spec_version: Option<PackageVersion>,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: PackageVersion,
    #[serde(default)]
    pub kind: PackageKind,
    #[serde(default)]
    pub release_status: ReleaseStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommends: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggests: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supports: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<InstallStanza>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub download: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_hash: Option<DownloadHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_size: Option<u64>,

    #[serde(default, alias = "ksp_version", skip_serializing_if = "Option::is_none")]
    pub game_version: Option<GameVersion>,
    #[serde(
        default,
        alias = "ksp_version_min",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_version_min: Option<GameVersion>,
    #[serde(
        default,
        alias = "ksp_version_max",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_version_max: Option<GameVersion>,
}

impl Package {
    /// A bare package with no relationships, mainly for building catalogs by hand.
    pub fn new(identifier: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            spec_version: None,
            identifier: identifier.into(),
            name: None,
            version,
            kind: PackageKind::Package,
            release_status: ReleaseStatus::Stable,
            depends: Vec::new(),
            recommends: Vec::new(),
            suggests: Vec::new(),
            supports: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
            install: Vec::new(),
            download: Vec::new(),
            download_size: None,
            download_hash: None,
            install_size: None,
            game_version: None,
            game_version_min: None,
            game_version_max: None,
        }
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ModError> {
        let fail = |reason: String| Err(ModError::metadata(Some(&self.identifier), reason));

        if self.identifier.is_empty() {
            return fail("empty identifier".to_string());
        }
        if let Some(spec) = &self.spec_version {
            let supported: PackageVersion = SUPPORTED_SPEC_VERSION.parse()?;
            if *spec > supported {
                return fail(format!(
                    "spec version v{} is newer than supported v{}",
                    spec, SUPPORTED_SPEC_VERSION
                ));
            }
        }
        if self.game_version.is_some()
            && (self.game_version_min.is_some() || self.game_version_max.is_some())
        {
            return fail("game_version cannot be combined with game_version_min/max".to_string());
        }
        for stanza in &self.install {
            stanza
                .validate()
                .map_err(|reason| ModError::metadata(Some(&self.identifier), reason))?;
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    pub fn is_dlc(&self) -> bool {
        self.kind == PackageKind::Dlc
    }

    pub fn is_metapackage(&self) -> bool {
        self.kind == PackageKind::Metapackage
    }

    /// The identifier followed by every virtual name this package provides.
    pub fn provides_list(&self) -> Vec<&str> {
        std::iter::once(self.identifier.as_str())
            .chain(self.provides.iter().map(String::as_str))
            .collect()
    }

    /// True if either package declares a conflict the other satisfies.
    pub fn conflicts_with(&self, other: &Package) -> bool {
        self.identifier != other.identifier
            && (self.conflicts.iter().any(|c| c.matches_package(other))
                || other.conflicts.iter().any(|c| c.matches_package(self)))
    }

    /// Game versions this release declares itself compatible with.
    pub fn compatibility_range(&self) -> GameVersionRange {
        match &self.game_version {
            Some(version) => version.to_range(),
            None => GameVersionRange::between(
                self.game_version_min.as_ref(),
                self.game_version_max.as_ref(),
            ),
        }
    }

    pub fn is_compatible(&self, criteria: &GameVersionCriteria) -> bool {
        criteria.accepts(&self.compatibility_range())
    }

    /// Stanzas to install with, falling back to the default of finding a
    /// folder named after the identifier.
    pub fn effective_stanzas(&self, primary_dir: &str) -> Vec<InstallStanza> {
        if self.install.is_empty() {
            vec![InstallStanza::default_for(&self.identifier, primary_dir)]
        } else {
            self.install.clone()
        }
    }

    pub fn download_descriptor(&self) -> DownloadDescriptor<'_> {
        DownloadDescriptor {
            urls: &self.download,
            size: self.download_size,
            hash: self.download_hash.as_ref(),
        }
    }

    /// File name used for this release in the download cache.
    pub fn cache_file_name(&self) -> String {
        let extension = self
            .download
            .first()
            .and_then(|url| archive_extension(url))
            .unwrap_or("zip");
        let version = self.version.to_string().replace([':', '/', '\\'], "-");
        format!("{}-{}.{}", self.identifier, version, extension)
    }
}

fn archive_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    if path.ends_with(".tar.gz") {
        Some("tar.gz")
    } else if path.ends_with(".tgz") {
        Some("tgz")
    } else if path.ends_with(".zip") {
        Some("zip")
    } else {
        None
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.version == other.version
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.identifier, self.version)
    }
}

/// A user request of the form `identifier` or `identifier=version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub identifier: String,
    pub version: Option<PackageVersion>,
}

impl std::str::FromStr for PackageRequest {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identifier, version) = match s.split_once('=') {
            Some((id, version)) => (id.trim(), Some(version.trim().parse()?)),
            None => (s.trim(), None),
        };
        if identifier.is_empty() {
            return Err(ModError::metadata(None, format!("Invalid package request {:?}", s)));
        }
        Ok(Self {
            identifier: identifier.to_string(),
            version,
        })
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}={}", self.identifier, version),
            None => write!(f, "{}", self.identifier),
        }
    }
}

/// Accepts either a single string or an array of strings.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Accepts `"v1.4"`, `"1.4"` or the legacy integer `1`.
fn deserialize_spec_version<'de, D>(deserializer: D) -> Result<Option<PackageVersion>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SpecVersion {
        Number(u64),
        Text(String),
    }

    let text = match Option::<SpecVersion>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(SpecVersion::Number(n)) => n.to_string(),
        Some(SpecVersion::Text(s)) => s.trim_start_matches('v').to_string(),
    };
    text.parse().map(Some).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::package;

    #[test]
    fn test_identity_is_identifier_and_version() {
        let mut a = package("Foo", "1.0");
        let b = package("Foo", "1.0");
        a.name = Some("Something else".into());
        assert_eq!(a, b);
        assert_ne!(a, package("Foo", "1.1"));

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_deserialize_catalog_entry() {
        let json = r#"{
            "spec_version": "v1.4",
            "identifier": "Foo",
            "version": "1:1.2",
            "kind": "metapackage",
            "ksp_version": "1.12",
            "depends": [{"name": "Bar", "min_version": "1.0"}],
            "download": "https://example.com/Foo.zip",
            "install": [{"find": "Foo", "install_to": "GameData", "filter": "Thumbs.db"}]
        }"#;
        let pkg: Package = serde_json::from_str(json).unwrap();
        pkg.validate().unwrap();
        assert_eq!(pkg.kind, PackageKind::Metapackage);
        assert_eq!(pkg.version.epoch(), 1);
        assert_eq!(pkg.download, vec!["https://example.com/Foo.zip"]);
        assert_eq!(pkg.install[0].filter, vec!["Thumbs.db"]);
        assert_eq!(pkg.game_version, Some("1.12".parse().unwrap()));
        assert_eq!(pkg.depends[0].to_string(), "Bar 1.0 or later");
    }

    #[test]
    fn test_validate_rejects_mixed_game_versions() {
        let mut pkg = package("Foo", "1.0");
        pkg.game_version = Some("1.12".parse().unwrap());
        pkg.game_version_min = Some("1.8".parse().unwrap());
        assert!(matches!(pkg.validate(), Err(ModError::Metadata { .. })));
    }

    #[test]
    fn test_validate_rejects_future_spec() {
        let json = r#"{"spec_version": "v99.0", "identifier": "Foo", "version": "1.0"}"#;
        let pkg: Package = serde_json::from_str(json).unwrap();
        assert!(pkg.validate().is_err());

        let json = r#"{"spec_version": 1, "identifier": "Foo", "version": "1.0"}"#;
        let pkg: Package = serde_json::from_str(json).unwrap();
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_conflicts_are_checked_both_ways() {
        let mut a = package("A", "1.0");
        let b = package("B", "1.0");
        a.conflicts = vec![Relationship::direct("B")];
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));

        // A package never conflicts with another release of itself
        let mut a2 = package("A", "2.0");
        a2.conflicts = vec![Relationship::direct("A")];
        assert!(!a2.conflicts_with(&a));
    }

    #[test]
    fn test_conflict_through_provides() {
        let mut a = package("A", "1.0");
        let mut b = package("B", "1.0");
        a.conflicts = vec![Relationship::direct("Virtual")];
        b.provides = vec!["Virtual".into()];
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn test_compatibility() {
        let criteria = GameVersionCriteria::new(vec!["1.12.3".parse().unwrap()]);
        let mut pkg = package("Foo", "1.0");
        assert!(pkg.is_compatible(&criteria));

        pkg.game_version = Some("1.11".parse().unwrap());
        assert!(!pkg.is_compatible(&criteria));

        pkg.game_version = None;
        pkg.game_version_min = Some("1.8".parse().unwrap());
        assert!(pkg.is_compatible(&criteria));
    }

    #[test]
    fn test_provides_list_starts_with_identifier() {
        let mut pkg = package("Foo", "1.0");
        pkg.provides = vec!["Virtual".into()];
        assert_eq!(pkg.provides_list(), vec!["Foo", "Virtual"]);
    }

    #[test]
    fn test_cache_file_name() {
        let mut pkg = package("Foo", "1:2.0");
        pkg.download = vec!["https://example.com/dl/Foo.tar.gz?x=1".into()];
        assert_eq!(pkg.cache_file_name(), "Foo-1-2.0.tar.gz");
        pkg.download.clear();
        assert_eq!(pkg.cache_file_name(), "Foo-1-2.0.zip");
    }

    #[test]
    fn test_package_request_parsing() {
        let req: PackageRequest = "Foo=1.2".parse().unwrap();
        assert_eq!(req.identifier, "Foo");
        assert_eq!(req.version, Some("1.2".parse().unwrap()));
        assert_eq!(req.to_string(), "Foo=1.2");

        let req: PackageRequest = "Bar".parse().unwrap();
        assert_eq!(req.version, None);
        assert!("=1.0".parse::<PackageRequest>().is_err());
    }
}
