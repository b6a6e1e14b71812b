//! File-level work of the installer: extraction, deletion and tidying up.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::Installer;
use crate::archive::{InstallableFile, PackageArchive, dll_identifier, find_installable_files, open_archive};
use crate::dedup::{MIN_DEDUP_FILE_SIZE, contents_equal};
use crate::error::ModError;
use crate::index::{PackageIndex, Registry};
use crate::instance::GameInstance;
use crate::package::{InstalledPackageRecord, Package};
use crate::runtime::Runtime;
use crate::transaction::Transaction;

impl<'a, R: Runtime> Installer<'a, R> {
    /// Extracts `package` from `archive_path`.
    ///
    /// Returns the files and directories it now owns, relative to the
    /// instance root.
    pub(super) fn install_files(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &Registry,
        package: &Package,
        archive_path: &Path,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut archive = open_archive(self.runtime, archive_path)
            .with_context(|| format!("Failed to open archive of {}", package))?;
        let mut files = find_installable_files(package, archive.entries(), &self.instance.profile)?;
        files.retain(|f| !self.is_filtered(&f.destination));

        self.take_over_manual_binary(tx, staged, package, &files)?;
        self.check_unowned_files(tx, staged, package, archive.as_mut(), &files)?;

        let candidates = self
            .dedup
            .map(|d| d.candidates(&self.instance.root, package))
            .unwrap_or_default();

        let mut written: Vec<String> = Vec::new();
        let mut directories = BTreeSet::new();
        for file in &files {
            tx.check_cancelled()?;
            let target = self.absolute(package, &file.destination)?;
            if file.make_dir {
                tx.create_dir_all(&target)?;
                directories.insert(file.destination.clone());
                continue;
            }

            if self.runtime.exists(&target) {
                let owner = staged
                    .file_owner(&file.destination)
                    .or_else(|| written.contains(&file.destination).then(|| package.identifier.clone()));
                return Err(ModError::FileConflict {
                    path: file.destination.clone().into(),
                    installing: package.to_string(),
                    owner,
                }
                .into());
            }

            let (size, mode) = archive
                .entry(&file.source)
                .map(|e| (e.size, e.mode))
                .unwrap_or((0, None));
            if !self.link_existing_copy(tx, &candidates, &file.destination, size, &target) {
                let mut reader = archive
                    .read_entry(&file.source)
                    .with_context(|| format!("Failed to read {} from {}", file.source, package))?;
                tx.create_from_reader(&target, &mut reader)?;
                if let Some(mode) = mode
                    && mode & 0o111 != 0
                {
                    self.runtime.set_permissions(&target, mode & 0o777)?;
                }
            }

            directories.extend(parent_dirs(&file.destination).filter(|d| !self.instance.profile.is_reserved(d)));
            written.push(file.destination.clone());
        }

        debug!("{}: wrote {} files", package, written.len());
        Ok((written, directories.into_iter().collect()))
    }

    fn is_filtered(&self, destination: &str) -> bool {
        self.global_filters
            .iter()
            .chain(self.instance.install_filters.iter())
            .any(|filter| !filter.is_empty() && destination.contains(filter.as_str()))
    }

    fn absolute(&self, package: &Package, relative: &str) -> Result<PathBuf> {
        self.instance.to_absolute(relative).ok_or_else(|| {
            ModError::metadata(Some(&package.identifier), format!("{} escapes the instance", relative)).into()
        })
    }

    /// A manually installed copy of the package's binary is deleted if the
    /// package installs its own binary into the folder holding it, and an
    /// error otherwise.
    fn take_over_manual_binary(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &Registry,
        package: &Package,
        files: &[InstallableFile],
    ) -> Result<()> {
        let Some(manual) = staged.manual_binary_path(&package.identifier) else {
            return Ok(());
        };
        let manual_dir = manual.rsplit_once('/').map_or("", |(dir, _)| dir);
        let primary_dir = &self.instance.profile.primary_dir;
        let installs_there = files
            .iter()
            .filter(|f| !f.make_dir)
            .filter(|f| dll_identifier(primary_dir, &f.destination).as_deref() == Some(package.identifier.as_str()))
            .any(|f| {
                let dir = f.destination.rsplit_once('/').map_or("", |(dir, _)| dir);
                dir.eq_ignore_ascii_case(manual_dir)
            });
        let path = self.absolute(package, &manual)?;
        if !installs_there {
            return Err(ModError::LocationMismatch {
                identifier: package.identifier.clone(),
                path,
            }
            .into());
        }
        if self.runtime.exists(&path) {
            debug!("Replacing manually installed {:?}", path);
            tx.delete_file(&path)?;
        }
        Ok(())
    }

    /// Existing files nobody owns are replaced silently when identical.
    /// Different ones need the user's permission; headless sessions fail.
    fn check_unowned_files(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &Registry,
        package: &Package,
        archive: &mut dyn PackageArchive,
        files: &[InstallableFile],
    ) -> Result<()> {
        for file in files.iter().filter(|f| !f.make_dir) {
            let path = self.absolute(package, &file.destination)?;
            if !self.runtime.exists(&path) || self.runtime.is_dir(&path) || staged.file_owner(&file.destination).is_some() {
                continue;
            }

            let identical = {
                let mut existing = self.runtime.open(&path)?;
                let mut incoming = archive.read_entry(&file.source)?;
                contents_equal(&mut existing, &mut incoming)?
            };
            if !identical {
                if self.user.is_headless() {
                    return Err(ModError::FileConflict {
                        path: file.destination.clone().into(),
                        installing: package.to_string(),
                        owner: None,
                    }
                    .into());
                }
                let prompt = format!(
                    "{} already exists and differs from the copy in {}. Overwrite it?",
                    file.destination, package
                );
                if !self.user.confirm(&prompt)? {
                    return Err(ModError::cancelled(format!("kept existing {}", file.destination)).into());
                }
            }
            debug!("Replacing unowned {}", file.destination);
            tx.delete_file(&path)?;
        }
        Ok(())
    }

    /// Hard-links `target` to a copy of the same file in another instance.
    fn link_existing_copy(
        &self,
        tx: &mut Transaction<'a, R>,
        candidates: &BTreeMap<String, Vec<PathBuf>>,
        relative: &str,
        size: u64,
        target: &Path,
    ) -> bool {
        if size < MIN_DEDUP_FILE_SIZE {
            return false;
        }
        for candidate in candidates.get(relative).into_iter().flatten() {
            match self.runtime.file_identity(candidate) {
                Ok(identity) if identity.size == size => match tx.hard_link(candidate, target) {
                    Ok(()) => {
                        debug!("Linked {} to {:?}", relative, candidate);
                        return true;
                    }
                    Err(err) => debug!("Could not link {:?}: {:#}", candidate, err),
                },
                Ok(_) => debug!("{:?} has a different size, not linking", candidate),
                Err(err) => debug!("Skipping link candidate {:?}: {:#}", candidate, err),
            }
        }
        false
    }

    /// Deletes the files of `record`. Missing files are fine; files that
    /// cannot be deleted fail the whole package with
    /// [`ModError::DeletionFailure`].
    pub(super) fn remove_files(
        &self,
        tx: &mut Transaction<'a, R>,
        record: &InstalledPackageRecord,
        touched: &mut BTreeSet<String>,
    ) -> Result<()> {
        let mut undeletable = Vec::new();
        for file in &record.files {
            tx.check_cancelled()?;
            touched.extend(parent_dirs(file));
            let Some(path) = self.instance.to_absolute(file) else {
                warn!("Ignoring {} of {}: outside the instance", file, record.package);
                continue;
            };
            if !self.runtime.exists(&path) {
                debug!("{} is already gone", file);
                continue;
            }
            if self.runtime.is_dir(&path) {
                touched.insert(file.clone());
                continue;
            }
            if let Err(err) = tx.delete_file(&path) {
                warn!("{:#}", err);
                undeletable.push(path);
            }
        }
        for dir in &record.directories {
            touched.extend(parent_dirs(dir));
            touched.insert(dir.clone());
        }

        if !undeletable.is_empty() {
            return Err(ModError::DeletionFailure {
                package: record.package.to_string(),
                files: undeletable,
            }
            .into());
        }
        Ok(())
    }

    /// Removes directories left empty, deepest first.
    ///
    /// Unowned files under auto-removable folders are deleted along the way.
    /// Returns the directories that only hold unowned files.
    pub(super) fn clean_directories(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &Registry,
        touched: BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let profile = &self.instance.profile;
        let mut dirs: Vec<String> = touched.into_iter().filter(|d| !profile.is_reserved(d)).collect();
        dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));

        let mut config_only = Vec::new();
        for dir in dirs {
            tx.check_cancelled()?;
            let Some(path) = self.instance.to_absolute(&dir) else {
                continue;
            };
            if !self.runtime.is_dir(&path) {
                continue;
            }

            for entry in self.runtime.read_dir(&path)? {
                let Some(relative) = self.instance.to_relative(&entry) else {
                    continue;
                };
                if profile.is_auto_removable(&relative) && !self.owns_anything_under(staged, &relative) {
                    debug!("Removing leftover {}", relative);
                    self.delete_tree(tx, &entry)?;
                }
            }

            let remaining = self.runtime.read_dir(&path)?;
            if remaining.is_empty() {
                tx.remove_dir(&path)?;
            } else if remaining.iter().all(|entry| {
                !self.runtime.is_dir(entry)
                    && self
                        .instance
                        .to_relative(entry)
                        .is_some_and(|r| staged.file_owner(&r).is_none())
            }) {
                config_only.push(dir);
            }
        }
        config_only.sort();
        Ok(config_only)
    }

    fn owns_anything_under(&self, staged: &Registry, relative: &str) -> bool {
        let prefix = format!("{}/", relative);
        staged.file_owner(relative).is_some()
            || staged
                .installed_packages()
                .iter()
                .flat_map(|r| r.files.iter())
                .any(|f| f.starts_with(&prefix))
    }

    fn delete_tree(&self, tx: &mut Transaction<'a, R>, path: &Path) -> Result<()> {
        if !self.runtime.is_dir(path) {
            return tx.delete_file(path);
        }
        for entry in self.runtime.read_dir(path)? {
            self.delete_tree(tx, &entry)?;
        }
        tx.remove_dir(path)
    }
}

/// Every ancestor directory of a relative path, nearest first.
fn parent_dirs(relative: &str) -> impl Iterator<Item = String> + '_ {
    relative
        .char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(i, _)| relative[..i].to_string())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
}

fn depth(relative: &str) -> usize {
    relative.matches('/').count()
}

/// Registers loose DLLs under the primary mod directory that no package
/// owns as manually installed, and forgets manual entries whose file is gone.
///
/// Returns the number of newly found binaries.
#[tracing::instrument(skip(runtime, instance, registry))]
pub fn scan_manual_binaries<R: Runtime + ?Sized>(
    runtime: &R,
    instance: &GameInstance,
    registry: &mut Registry,
) -> Result<usize> {
    for (identifier, relative) in registry.manual_binaries() {
        let present = instance.to_absolute(&relative).is_some_and(|p| runtime.exists(&p));
        if !present {
            debug!("Manual binary {} is gone", identifier);
            registry.deregister_manual_binary(&identifier);
        }
    }

    let primary = instance.root.join(&instance.profile.primary_dir);
    if !runtime.is_dir(&primary) {
        return Ok(0);
    }

    let mut found = 0;
    let mut stack = vec![primary];
    while let Some(dir) = stack.pop() {
        for entry in runtime.read_dir(&dir)? {
            if runtime.is_dir(&entry) {
                stack.push(entry);
                continue;
            }
            let Some(relative) = instance.to_relative(&entry) else {
                continue;
            };
            if registry.file_owner(&relative).is_some() {
                continue;
            }
            let Some(identifier) = dll_identifier(&instance.profile.primary_dir, &relative) else {
                continue;
            };
            if registry.is_installed(&identifier) || registry.manual_binary_path(&identifier).is_some() {
                continue;
            }
            debug!("Found manually installed {} at {}", identifier, relative);
            registry.register_manual_binary(&identifier, &relative);
            found += 1;
        }
    }
    Ok(found)
}
