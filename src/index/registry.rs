//! In-memory package index with file ownership bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use super::PackageIndex;
use crate::error::ModError;
use crate::package::{InstalledPackageRecord, Package};
use crate::relationship::Unmanaged;
use crate::resolver::sanity::find_unsatisfied_depends;
use crate::version::{GameVersionCriteria, PackageVersion, UnmanagedVersion};

/// Catalog plus the installed state of one instance.
///
/// Only installed state is persisted; the catalog is attached after loading
/// with [`Registry::set_available`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(skip)]
    available: BTreeMap<String, Vec<Package>>,
    #[serde(default)]
    installed: BTreeMap<String, InstalledPackageRecord>,
    #[serde(skip)]
    file_owners: BTreeMap<String, String>,
    #[serde(default)]
    manual_binaries: BTreeMap<String, String>,
    #[serde(default)]
    dlc: BTreeMap<String, UnmanagedVersion>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_available(packages: Vec<Package>) -> Result<Self, ModError> {
        let mut registry = Self::new();
        registry.set_available(packages)?;
        Ok(registry)
    }

    /// Replaces the catalog. Every package is validated first.
    pub fn set_available(&mut self, packages: Vec<Package>) -> Result<(), ModError> {
        let mut available: BTreeMap<String, Vec<Package>> = BTreeMap::new();
        for package in packages {
            package.validate()?;
            available
                .entry(package.identifier.clone())
                .or_default()
                .push(package);
        }
        for versions in available.values_mut() {
            versions.sort_by(|a, b| b.version.cmp(&a.version));
            versions.dedup_by(|a, b| a.version == b.version);
        }
        self.available = available;
        Ok(())
    }

    /// Rebuilds the file ownership map from installed records.
    pub fn rebuild_file_owners(&mut self) {
        self.file_owners = self
            .installed
            .values()
            .flat_map(|record| {
                record
                    .files
                    .iter()
                    .map(|f| (f.clone(), record.identifier().to_string()))
            })
            .collect();
    }

    /// Records an installed package and claims its files.
    ///
    /// Fails with [`ModError::FileConflict`] if another package already owns
    /// one of the files; the registry is left untouched in that case.
    pub fn register_package(&mut self, record: InstalledPackageRecord) -> Result<(), ModError> {
        let identifier = record.identifier().to_string();
        for file in &record.files {
            if let Some(owner) = self.file_owners.get(file)
                && *owner != identifier
            {
                return Err(ModError::FileConflict {
                    path: file.into(),
                    installing: record.package.to_string(),
                    owner: Some(owner.clone()),
                });
            }
        }

        if let Some(previous) = self.installed.remove(&identifier) {
            self.release_files(&previous);
        }
        for file in &record.files {
            self.file_owners.insert(file.clone(), identifier.clone());
        }
        self.manual_binaries.remove(&identifier);
        debug!("Registered {} with {} files", record.package, record.files.len());
        self.installed.insert(identifier, record);
        Ok(())
    }

    pub fn deregister_package(&mut self, identifier: &str) -> Result<InstalledPackageRecord, ModError> {
        let record = self
            .installed
            .remove(identifier)
            .ok_or_else(|| ModError::NotInstalled {
                identifier: identifier.to_string(),
            })?;
        self.release_files(&record);
        debug!("Deregistered {}", record.package);
        Ok(record)
    }

    fn release_files(&mut self, record: &InstalledPackageRecord) {
        for file in &record.files {
            if self.file_owners.get(file).map(String::as_str) == Some(record.identifier()) {
                self.file_owners.remove(file);
            }
        }
    }

    pub fn register_manual_binary(&mut self, identifier: &str, relative_path: &str) {
        self.manual_binaries
            .insert(identifier.to_string(), relative_path.to_string());
    }

    pub fn deregister_manual_binary(&mut self, identifier: &str) -> Option<String> {
        self.manual_binaries.remove(identifier)
    }

    pub fn register_dlc(&mut self, identifier: &str, version: UnmanagedVersion) {
        self.dlc.insert(identifier.to_string(), version);
    }

    pub fn is_installed(&self, identifier: &str) -> bool {
        self.installed.contains_key(identifier)
    }

    /// Reverse dependencies of `removing` in the installed set with
    /// `installing` added on top, including `removing` itself.
    pub fn reverse_dependencies_of(&self, removing: &[String], installing: &[Package]) -> Vec<String> {
        let manual: BTreeSet<String> = self.manual_binaries.keys().cloned().collect();
        let unmanaged = Unmanaged {
            manual: &manual,
            dlc: &self.dlc,
        };

        let mut to_remove: BTreeSet<String> = removing.iter().cloned().collect();
        loop {
            let remaining: Vec<&Package> = self
                .installed
                .values()
                .map(|r| &r.package)
                .filter(|p| !installing.iter().any(|i| i.identifier == p.identifier))
                .chain(installing.iter())
                .filter(|p| !to_remove.contains(&p.identifier))
                .collect();

            let broken: BTreeSet<String> = find_unsatisfied_depends(&remaining, unmanaged)
                .into_iter()
                .map(|(package, _)| package.identifier.clone())
                .collect();

            if broken.is_subset(&to_remove) || broken.is_empty() {
                return to_remove.into_iter().collect();
            }
            to_remove.extend(broken);
        }
    }
}

impl PackageIndex for Registry {
    fn available_versions(&self, identifier: &str) -> Vec<Package> {
        self.available.get(identifier).cloned().unwrap_or_default()
    }

    fn latest_available(&self, identifier: &str, criteria: &GameVersionCriteria) -> Option<Package> {
        self.available
            .get(identifier)?
            .iter()
            .find(|p| p.is_compatible(criteria))
            .cloned()
    }

    fn latest_available_with_provides(
        &self,
        name: &str,
        criteria: &GameVersionCriteria,
    ) -> Vec<Package> {
        self.available
            .values()
            .filter_map(|versions| {
                versions.iter().find(|p| {
                    p.is_compatible(criteria)
                        && (p.identifier == name || p.provides.iter().any(|v| v == name))
                })
            })
            .cloned()
            .collect()
    }

    fn all_available(&self) -> Vec<Package> {
        self.available.values().flatten().cloned().collect()
    }

    fn installed_record(&self, identifier: &str) -> Option<InstalledPackageRecord> {
        self.installed.get(identifier).cloned()
    }

    fn installed_version(&self, identifier: &str) -> Option<PackageVersion> {
        self.installed
            .get(identifier)
            .map(|record| record.package.version.clone())
    }

    fn installed_packages(&self) -> Vec<InstalledPackageRecord> {
        self.installed.values().cloned().collect()
    }

    fn file_owner(&self, relative_path: &str) -> Option<String> {
        self.file_owners.get(relative_path).cloned()
    }

    fn manual_binaries(&self) -> BTreeMap<String, String> {
        self.manual_binaries.clone()
    }

    fn manual_binary_path(&self, identifier: &str) -> Option<String> {
        self.manual_binaries.get(identifier).cloned()
    }

    fn dlc(&self) -> BTreeMap<String, UnmanagedVersion> {
        self.dlc.clone()
    }

    fn find_reverse_dependencies(&self, identifiers: &[String]) -> Vec<String> {
        self.reverse_dependencies_of(identifiers, &[])
    }

    fn find_removable_auto_installed(
        &self,
        installing: &[Package],
        removing: &[String],
    ) -> Vec<InstalledPackageRecord> {
        let auto: Vec<&InstalledPackageRecord> = self
            .installed
            .values()
            .filter(|r| r.auto_installed)
            .filter(|r| !removing.iter().any(|id| id == r.identifier()))
            .filter(|r| !installing.iter().any(|p| p.identifier == r.identifier()))
            .collect();
        let auto_ids: BTreeSet<&str> = auto.iter().map(|r| r.identifier()).collect();

        auto.into_iter()
            .filter(|record| {
                let mut candidate = removing.to_vec();
                candidate.push(record.identifier().to_string());
                self.reverse_dependencies_of(&candidate, installing)
                    .iter()
                    .filter(|id| !removing.contains(id))
                    .all(|id| auto_ids.contains(id.as_str()))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::Relationship;
    use crate::test_utils::package;

    fn depends_on(id: &str, version: &str, deps: &[&str]) -> Package {
        let mut p = package(id, version);
        p.depends = deps.iter().map(|d| Relationship::direct(*d)).collect();
        p
    }

    fn install(registry: &mut Registry, package: Package, files: &[&str], auto: bool) {
        let record = InstalledPackageRecord::new(
            package,
            files.iter().map(|f| f.to_string()).collect(),
            Vec::new(),
            auto,
            "main",
        );
        registry.register_package(record).unwrap();
    }

    #[test]
    fn test_register_claims_files() {
        let mut registry = Registry::new();
        install(&mut registry, package("Foo", "1.0"), &["GameData/Foo/a.cfg"], false);
        assert_eq!(registry.file_owner("GameData/Foo/a.cfg"), Some("Foo".into()));
        assert_eq!(registry.installed_version("Foo"), Some("1.0".parse().unwrap()));
    }

    #[test]
    fn test_register_rejects_owned_file() {
        let mut registry = Registry::new();
        install(&mut registry, package("Foo", "1.0"), &["GameData/shared.cfg"], false);

        let record = InstalledPackageRecord::new(
            package("Bar", "1.0"),
            vec!["GameData/shared.cfg".into(), "GameData/Bar/b.cfg".into()],
            Vec::new(),
            false,
            "main",
        );
        let err = registry.register_package(record).unwrap_err();
        match err {
            ModError::FileConflict { owner, .. } => assert_eq!(owner, Some("Foo".into())),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!registry.is_installed("Bar"));
        assert_eq!(registry.file_owner("GameData/Bar/b.cfg"), None);
    }

    #[test]
    fn test_deregister_releases_files() {
        let mut registry = Registry::new();
        install(&mut registry, package("Foo", "1.0"), &["GameData/Foo/a.cfg"], false);
        let record = registry.deregister_package("Foo").unwrap();
        assert_eq!(record.files, vec!["GameData/Foo/a.cfg"]);
        assert_eq!(registry.file_owner("GameData/Foo/a.cfg"), None);
        assert!(matches!(
            registry.deregister_package("Foo"),
            Err(ModError::NotInstalled { .. })
        ));
    }

    #[test]
    fn test_reverse_dependencies_are_transitive() {
        let mut registry = Registry::new();
        install(&mut registry, package("Base", "1.0"), &[], false);
        install(&mut registry, depends_on("Mid", "1.0", &["Base"]), &[], false);
        install(&mut registry, depends_on("Top", "1.0", &["Mid"]), &[], false);
        install(&mut registry, package("Other", "1.0"), &[], false);

        let revdeps = registry.find_reverse_dependencies(&["Base".into()]);
        assert_eq!(revdeps, vec!["Base", "Mid", "Top"]);
    }

    #[test]
    fn test_reverse_dependencies_respect_alternatives() {
        let mut registry = Registry::new();
        let mut alt = package("AltProvider", "1.0");
        alt.provides = vec!["Virtual".into()];
        let mut main = package("MainProvider", "1.0");
        main.provides = vec!["Virtual".into()];
        install(&mut registry, alt, &[], false);
        install(&mut registry, main, &[], false);
        install(&mut registry, depends_on("User", "1.0", &["Virtual"]), &[], false);

        let revdeps = registry.find_reverse_dependencies(&["AltProvider".into()]);
        assert_eq!(revdeps, vec!["AltProvider"]);
    }

    #[test]
    fn test_removable_auto_installed() {
        let mut registry = Registry::new();
        install(&mut registry, package("Lib", "1.0"), &[], true);
        install(&mut registry, package("Orphan", "1.0"), &[], true);
        install(&mut registry, depends_on("App", "1.0", &["Lib"]), &[], false);
        install(&mut registry, depends_on("Tool", "1.0", &["Orphan"]), &[], false);

        // Removing Tool leaves Orphan unused, Lib is still needed by App
        let removable = registry.find_removable_auto_installed(&[], &["Tool".into()]);
        let ids: Vec<&str> = removable.iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["Orphan"]);
    }

    #[test]
    fn test_latest_available_with_provides() {
        let mut a = package("A", "1.0");
        a.provides = vec!["Virtual".into()];
        let mut a2 = package("A", "2.0");
        a2.provides = vec!["Virtual".into()];
        let b = package("Virtual", "0.5");
        let registry = Registry::with_available(vec![a, a2, b, package("C", "1.0")]).unwrap();

        let providers = registry.latest_available_with_provides("Virtual", &GameVersionCriteria::any());
        let found: Vec<String> = providers.iter().map(|p| p.to_string()).collect();
        assert_eq!(found, vec!["A 2.0", "Virtual 0.5"]);
    }

    #[test]
    fn test_latest_available_skips_incompatible() {
        let mut new = package("Foo", "2.0");
        new.game_version = Some("1.12".parse().unwrap());
        let mut old = package("Foo", "1.0");
        old.game_version = Some("1.8".parse().unwrap());
        let registry = Registry::with_available(vec![new, old]).unwrap();

        let criteria = GameVersionCriteria::new(vec!["1.8.1".parse().unwrap()]);
        assert_eq!(
            registry.latest_available("Foo", &criteria).map(|p| p.version),
            Some("1.0".parse().unwrap())
        );
        assert_eq!(registry.available_versions("Foo").len(), 2);
    }
}
