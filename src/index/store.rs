//! Loading and saving registries and catalogs on disk.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

use crate::package::Package;
use crate::runtime::Runtime;

use super::Registry;

/// Directory inside an instance that holds modforge state.
pub const STATE_DIR: &str = ".modforge";

/// Reads and writes the registry of a single instance.
///
/// Layout:
/// - `<instance>/.modforge/registry.json`: installed packages, manual binaries, DLC
/// - `<data root>/catalog.json`: available packages, shared by every instance
pub struct RegistryStore<'a, R: Runtime> {
    runtime: &'a R,
    instance_root: PathBuf,
}

impl<'a, R: Runtime> RegistryStore<'a, R> {
    pub fn new(runtime: &'a R, instance_root: PathBuf) -> Self {
        Self {
            runtime,
            instance_root,
        }
    }

    pub fn instance_root(&self) -> &Path {
        &self.instance_root
    }

    /// Returns: `<instance>/.modforge`
    pub fn state_dir(&self) -> PathBuf {
        self.instance_root.join(STATE_DIR)
    }

    /// Returns: `<instance>/.modforge/registry.json`
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir().join("registry.json")
    }

    /// Load the registry, or an empty one if the instance has none yet.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<Registry> {
        let path = self.registry_path();
        if !self.runtime.exists(&path) {
            debug!("No registry at {:?}, starting empty", path);
            return Ok(Registry::new());
        }
        let content = self
            .runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read registry at {:?}", path))?;
        let mut registry: Registry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry at {:?}", path))?;
        registry.rebuild_file_owners();
        Ok(registry)
    }

    /// Load the registry and attach the catalog at `catalog_path`.
    pub fn load_with_catalog(&self, catalog_path: &Path) -> Result<Registry> {
        let mut registry = self.load()?;
        let packages = load_catalog(self.runtime, catalog_path)?;
        registry.set_available(packages)?;
        Ok(registry)
    }

    /// Serialized registry, for writing through a transaction.
    pub fn to_bytes(registry: &Registry) -> Result<Vec<u8>> {
        let content = serde_json::to_string_pretty(registry)?;
        Ok(content.into_bytes())
    }

    /// Write the registry directly, outside any transaction.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let path = self.registry_path();
        if let Some(parent) = path.parent()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }
        let content = Self::to_bytes(registry)?;
        self.runtime
            .write(&path, &content)
            .with_context(|| format!("Failed to save registry to {:?}", path))
    }
}

/// Read a catalog file: a JSON array of package descriptors.
#[tracing::instrument(skip(runtime))]
pub fn load_catalog<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Vec<Package>> {
    if !runtime.exists(path) {
        debug!("No catalog at {:?}", path);
        return Ok(Vec::new());
    }
    let content = runtime
        .read_to_string(path)
        .with_context(|| format!("Failed to read catalog at {:?}", path))?;
    let packages: Vec<Package> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog at {:?}", path))?;
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PackageIndex;
    use crate::package::InstalledPackageRecord;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::test_utils::package;
    use mockall::predicate::eq;
    use tempfile::tempdir;

    #[test]
    fn test_registry_path() {
        let runtime = MockRuntime::new();
        let store = RegistryStore::new(&runtime, PathBuf::from("/games/ksp"));
        assert_eq!(
            store.registry_path(),
            PathBuf::from("/games/ksp/.modforge/registry.json")
        );
    }

    #[test]
    fn test_load_missing_registry_is_empty() -> Result<()> {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/games/ksp/.modforge/registry.json")))
            .returning(|_| false);

        let store = RegistryStore::new(&runtime, PathBuf::from("/games/ksp"));
        let registry = store.load()?;
        assert!(registry.installed_packages().is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_load_keeps_ownership() -> Result<()> {
        let dir = tempdir()?;
        let runtime = RealRuntime;
        let store = RegistryStore::new(&runtime, dir.path().to_path_buf());

        let mut registry = Registry::new();
        registry.register_package(InstalledPackageRecord::new(
            package("Foo", "1.0"),
            vec!["GameData/Foo/a.cfg".into()],
            vec!["GameData/Foo".into()],
            true,
            "main",
        ))?;
        registry.register_manual_binary("Manual", "GameData/Manual.dll");
        store.save(&registry)?;

        let loaded = store.load()?;
        assert_eq!(loaded.file_owner("GameData/Foo/a.cfg"), Some("Foo".into()));
        assert!(loaded.installed_record("Foo").is_some_and(|r| r.auto_installed));
        assert_eq!(
            loaded.manual_binary_path("Manual"),
            Some("GameData/Manual.dll".into())
        );
        Ok(())
    }

    #[test]
    fn test_load_with_catalog() -> Result<()> {
        let dir = tempdir()?;
        let runtime = RealRuntime;
        let catalog = dir.path().join("catalog.json");
        std::fs::write(
            &catalog,
            r#"[{"identifier": "Foo", "version": "1.0"}, {"identifier": "Foo", "version": "1.1"}]"#,
        )?;

        let store = RegistryStore::new(&runtime, dir.path().join("instance"));
        let registry = store.load_with_catalog(&catalog)?;
        assert_eq!(registry.available_versions("Foo")[0].version.to_string(), "1.1");
        Ok(())
    }

    #[test]
    fn test_invalid_catalog_entry_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let runtime = RealRuntime;
        let catalog = dir.path().join("catalog.json");
        std::fs::write(
            &catalog,
            r#"[{"identifier": "Foo", "version": "1.0", "install": [{"install_to": "GameData"}]}]"#,
        )?;

        let store = RegistryStore::new(&runtime, dir.path().join("instance"));
        let err = store.load_with_catalog(&catalog).unwrap_err();
        assert!(crate::error::find_mod_error(&err).is_some());
        Ok(())
    }
}
