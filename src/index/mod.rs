//! The package index: what is available, what is installed, and who owns which file.

mod registry;
mod store;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ModError;
use crate::package::{InstalledPackageRecord, Package, PackageRequest};
use crate::version::{GameVersionCriteria, PackageVersion, UnmanagedVersion};

pub use registry::Registry;
pub use store::{RegistryStore, STATE_DIR, load_catalog};

/// Read access to available and installed packages.
///
/// Results are owned clones so implementations are free to keep their data
/// behind locks or on disk.
#[cfg_attr(test, mockall::automock)]
pub trait PackageIndex: Send + Sync {
    /// Every release of `identifier`, newest first.
    fn available_versions(&self, identifier: &str) -> Vec<Package>;

    /// Newest release of `identifier` compatible with `criteria`.
    fn latest_available(&self, identifier: &str, criteria: &GameVersionCriteria) -> Option<Package>;

    /// Newest compatible release of every package that is or provides `name`.
    fn latest_available_with_provides(
        &self,
        name: &str,
        criteria: &GameVersionCriteria,
    ) -> Vec<Package>;

    /// Every release of every package.
    fn all_available(&self) -> Vec<Package>;

    fn installed_record(&self, identifier: &str) -> Option<InstalledPackageRecord>;

    fn installed_version(&self, identifier: &str) -> Option<PackageVersion>;

    fn installed_packages(&self) -> Vec<InstalledPackageRecord>;

    /// Identifier of the package owning a path relative to the instance root.
    fn file_owner(&self, relative_path: &str) -> Option<String>;

    /// Manually installed binaries: identifier to relative path.
    fn manual_binaries(&self) -> BTreeMap<String, String>;

    fn manual_binary_path(&self, identifier: &str) -> Option<String>;

    fn dlc(&self) -> BTreeMap<String, UnmanagedVersion>;

    /// Installed packages that stop working if `identifiers` are removed,
    /// transitively, including `identifiers` themselves.
    fn find_reverse_dependencies(&self, identifiers: &[String]) -> Vec<String>;

    /// Auto-installed packages nothing needs any more once `installing` is
    /// added and `removing` is gone.
    fn find_removable_auto_installed(
        &self,
        installing: &[Package],
        removing: &[String],
    ) -> Vec<InstalledPackageRecord>;
}

/// Names of manually installed binaries, the form relationship checks want.
pub fn manual_names<I: PackageIndex + ?Sized>(index: &I) -> BTreeSet<String> {
    index.manual_binaries().into_keys().collect()
}

/// Looks up the release a user asked for.
///
/// An explicit version must exist in the catalog. Otherwise the newest
/// compatible release is used, falling back to a unique provider of the name.
pub fn find_requested<I: PackageIndex + ?Sized>(
    index: &I,
    request: &PackageRequest,
    criteria: &GameVersionCriteria,
) -> Result<Package, ModError> {
    let unsatisfiable = || ModError::Unsatisfiable {
        relationship: request.to_string(),
        parent: None,
    };

    if let Some(version) = &request.version {
        return index
            .available_versions(&request.identifier)
            .into_iter()
            .find(|p| p.version == *version)
            .ok_or_else(unsatisfiable);
    }

    if let Some(package) = index.latest_available(&request.identifier, criteria) {
        return Ok(package);
    }

    let mut providers = index.latest_available_with_provides(&request.identifier, criteria);
    match providers.len() {
        0 => Err(unsatisfiable()),
        1 => Ok(providers.remove(0)),
        _ => {
            providers.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            Err(ModError::AmbiguousProvider {
                requested: request.identifier.clone(),
                candidates: providers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::package;
    use mockall::predicate::eq;

    #[test]
    fn test_find_requested_exact_version() {
        let mut index = MockPackageIndex::new();
        index
            .expect_available_versions()
            .with(eq("Foo"))
            .returning(|_| vec![package("Foo", "2.0"), package("Foo", "1.0")]);

        let request: PackageRequest = "Foo=1.0".parse().unwrap();
        let found = find_requested(&index, &request, &GameVersionCriteria::any()).unwrap();
        assert_eq!(found, package("Foo", "1.0"));

        let request: PackageRequest = "Foo=3.0".parse().unwrap();
        let err = find_requested(&index, &request, &GameVersionCriteria::any()).unwrap_err();
        assert!(matches!(err, ModError::Unsatisfiable { .. }));
    }

    #[test]
    fn test_find_requested_falls_back_to_provider() {
        let mut index = MockPackageIndex::new();
        index.expect_latest_available().returning(|_, _| None);
        index
            .expect_latest_available_with_provides()
            .returning(|_, _| vec![package("Impl", "1.0")]);

        let request: PackageRequest = "Virtual".parse().unwrap();
        let found = find_requested(&index, &request, &GameVersionCriteria::any()).unwrap();
        assert_eq!(found.identifier, "Impl");
    }

    #[test]
    fn test_find_requested_ambiguous_provider() {
        let mut index = MockPackageIndex::new();
        index.expect_latest_available().returning(|_, _| None);
        index
            .expect_latest_available_with_provides()
            .returning(|_, _| vec![package("Zeta", "1.0"), package("Alpha", "1.0")]);

        let request: PackageRequest = "Virtual".parse().unwrap();
        let err = find_requested(&index, &request, &GameVersionCriteria::any()).unwrap_err();
        match err {
            ModError::AmbiguousProvider {
                requested,
                candidates,
            } => {
                assert_eq!(requested, "Virtual");
                assert_eq!(candidates[0].identifier, "Alpha");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
