//! Installing, removing, upgrading and replacing packages in one instance.
//!
//! Every operation follows the same path: resolve the request into a
//! [`ChangePlan`], check free space, confirm with the user, then apply all
//! removals and installs inside a single [`Transaction`]. The registry is
//! staged on a copy and only replaces the caller's registry after the
//! transaction commits.

mod files;
mod progress;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::dedup::Deduplicator;
use crate::download::{DownloadEvent, DownloadRequest, Downloader};
use crate::error::{ModError, find_mod_error, format_size};
use crate::index::{PackageIndex, Registry, RegistryStore};
use crate::instance::GameInstance;
use crate::package::{InstalledPackageRecord, Package};
use crate::resolver::{RelationshipResolver, ResolverOptions, SelectionReason, dependency_order};
use crate::runtime::Runtime;
use crate::transaction::Transaction;
use crate::user::User;

pub use files::scan_manual_binaries;
pub use progress::ByteRateCounter;

/// How long the download feed is waited on before checking for cancellation.
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A package to install and the bookkeeping it gets.
#[derive(Debug, Clone)]
pub struct PlannedInstall {
    pub package: Package,
    pub auto_installed: bool,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRemoval {
    pub identifier: String,
    pub reason: SelectionReason,
}

/// Everything one batch changes, in the order it is applied.
#[derive(Debug, Clone, Default)]
pub struct ChangePlan {
    pub removals: Vec<PlannedRemoval>,
    /// In dependency order.
    pub installs: Vec<PlannedInstall>,
    /// Planned installs each planned install has to wait for.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.installs.is_empty()
    }

    /// True once every planned dependency of `identifier` is in `done`.
    pub fn is_ready(&self, identifier: &str, done: &BTreeSet<String>) -> bool {
        self.dependencies
            .get(identifier)
            .is_none_or(|deps| deps.is_subset(done))
    }
}

/// What a committed batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub installed: Vec<String>,
    pub removed: Vec<String>,
    /// Directories left behind holding only files no package owns, most
    /// likely user configuration.
    pub possible_config_only: Vec<String>,
}

/// How a requested release relates to what is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Install,
    Reinstall,
    Upgrade,
    Downgrade,
}

impl ChangeKind {
    fn classify(installed: Option<&Package>, target: &Package) -> Self {
        match installed {
            None => ChangeKind::Install,
            Some(current) if current.version == target.version => ChangeKind::Reinstall,
            Some(current) if current.version < target.version => ChangeKind::Upgrade,
            Some(_) => ChangeKind::Downgrade,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Install => write!(f, "install"),
            ChangeKind::Reinstall => write!(f, "reinstall"),
            ChangeKind::Upgrade => write!(f, "upgrade"),
            ChangeKind::Downgrade => write!(f, "downgrade"),
        }
    }
}

/// Applies change sets to one game instance.
pub struct Installer<'a, R: Runtime> {
    runtime: &'a R,
    instance: &'a GameInstance,
    cache: &'a dyn Cache,
    downloader: &'a dyn Downloader,
    user: &'a dyn User,
    cancel: CancellationToken,
    global_filters: Vec<String>,
    cache_size_limit: Option<u64>,
    dedup: Option<&'a Deduplicator<'a, R>>,
}

impl<'a, R: Runtime> Installer<'a, R> {
    pub fn new(
        runtime: &'a R,
        instance: &'a GameInstance,
        cache: &'a dyn Cache,
        downloader: &'a dyn Downloader,
        user: &'a dyn User,
    ) -> Self {
        Self {
            runtime,
            instance,
            cache,
            downloader,
            user,
            cancel: CancellationToken::new(),
            global_filters: Vec::new(),
            cache_size_limit: None,
            dedup: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Destination substrings excluded in every instance.
    pub fn with_global_filters(mut self, filters: Vec<String>) -> Self {
        self.global_filters = filters;
        self
    }

    pub fn with_cache_size_limit(mut self, limit: Option<u64>) -> Self {
        self.cache_size_limit = limit;
        self
    }

    /// Hard-links files from other instances instead of extracting them.
    pub fn with_deduplicator(mut self, dedup: &'a Deduplicator<'a, R>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Installs `requested` and everything they need.
    ///
    /// Requested packages that are already installed, at any version, are
    /// skipped; use [`Installer::upgrade`] to change their version.
    #[tracing::instrument(skip(self, registry, requested))]
    pub fn install_list(
        &self,
        registry: &mut Registry,
        requested: &[Package],
        options: ResolverOptions,
    ) -> Result<ChangeReport> {
        reject_dlc(registry, requested.iter())?;

        let mut wanted = Vec::new();
        for package in requested {
            match registry.installed_version(&package.identifier) {
                Some(version) => self.user.message(&format!(
                    "{} {} is already installed, skipping",
                    package.identifier, version
                )),
                None => wanted.push(package.clone()),
            }
        }
        if wanted.is_empty() {
            return Ok(ChangeReport::default());
        }

        let plan = self.plan(registry, &wanted, &[], options)?;
        let required: u64 = plan.installs.iter().filter_map(|i| i.package.install_size).sum();
        self.check_space(required)?;
        self.confirm_plan(registry, &plan)?;
        self.execute(registry, &plan)
    }

    /// Removes `identifiers`, everything that depends on them, and
    /// auto-installed packages nothing needs any more.
    #[tracing::instrument(skip(self, registry))]
    pub fn uninstall_list(&self, registry: &mut Registry, identifiers: &[String]) -> Result<ChangeReport> {
        for identifier in identifiers {
            check_removable(registry, identifier)?;
        }

        let closure = registry.find_reverse_dependencies(identifiers);
        let mut removals: Vec<PlannedRemoval> = closure
            .iter()
            .map(|id| PlannedRemoval {
                identifier: id.clone(),
                reason: if identifiers.contains(id) {
                    SelectionReason::UserRequested
                } else {
                    SelectionReason::DependencyRemoved {
                        dependency: identifiers.join(", "),
                    }
                },
            })
            .collect();
        add_orphans(registry, &[], &mut removals);

        let plan = ChangePlan {
            removals,
            ..ChangePlan::default()
        };
        self.confirm_plan(registry, &plan)?;
        self.execute(registry, &plan)
    }

    /// Moves each target to the given release, installing it if absent.
    ///
    /// Dependencies the new releases need are added, and auto-installed
    /// packages that are no longer needed are removed.
    #[tracing::instrument(skip(self, registry, targets))]
    pub fn upgrade(
        &self,
        registry: &mut Registry,
        targets: &[Package],
        options: ResolverOptions,
    ) -> Result<ChangeReport> {
        reject_dlc(registry, targets.iter())?;

        let mut removing = Vec::new();
        for target in targets {
            let installed = registry.installed_record(&target.identifier).map(|r| r.package);
            let kind = ChangeKind::classify(installed.as_ref(), target);
            match (kind, &installed) {
                (ChangeKind::Downgrade, Some(current)) => self.user.warning(&format!(
                    "{} will be downgraded from {} to {}",
                    target.identifier, current.version, target.version
                )),
                _ => debug!("{}: {} to {}", target.identifier, kind, target.version),
            }
            if installed.is_some() {
                removing.push(target.identifier.clone());
            }
        }

        let plan = self.plan(registry, targets, &removing, options)?;
        self.check_space(net_growth(registry, &plan))?;
        self.confirm_plan(registry, &plan)?;
        self.execute(registry, &plan)
    }

    /// Swaps the installed `replaced` package for `replacement`.
    ///
    /// If `replacement` is already installed it is moved to the given
    /// release in the same transaction.
    #[tracing::instrument(skip(self, registry, replacement))]
    pub fn replace(
        &self,
        registry: &mut Registry,
        replaced: &str,
        replacement: &Package,
        options: ResolverOptions,
    ) -> Result<ChangeReport> {
        check_removable(registry, replaced)?;
        reject_dlc(registry, std::iter::once(replacement))?;
        let replaced_package = registry
            .installed_record(replaced)
            .map(|r| r.package)
            .ok_or_else(|| ModError::NotInstalled {
                identifier: replaced.to_string(),
            })?;

        let mut removing = vec![replaced.to_string()];
        if registry.is_installed(&replacement.identifier) && replacement.identifier != replaced {
            removing.push(replacement.identifier.clone());
        }

        let mut plan = self.plan(registry, std::slice::from_ref(replacement), &removing, options)?;
        for install in &mut plan.installs {
            if install.package.identifier == replacement.identifier {
                install.auto_installed = false;
                install.reason = SelectionReason::Replacement {
                    replaced: replaced_package.clone(),
                };
            }
        }
        for removal in &mut plan.removals {
            if removal.identifier == replaced {
                removal.reason = SelectionReason::Replacement {
                    replaced: replaced_package.clone(),
                };
            }
        }

        self.check_space(net_growth(registry, &plan))?;
        self.confirm_plan(registry, &plan)?;
        self.execute(registry, &plan)
    }

    /// Resolves `requested` with `removing` treated as gone and works out
    /// every removal the change implies.
    fn plan(
        &self,
        registry: &Registry,
        requested: &[Package],
        removing: &[String],
        options: ResolverOptions,
    ) -> Result<ChangePlan> {
        let options = options.with_stability_tolerance(self.instance.stability_tolerance);
        let resolver = RelationshipResolver::new(registry, &self.instance.criteria, options, requested, removing)?;
        let mod_list = resolver.mod_list();
        reject_dlc(registry, mod_list.iter().copied())?;

        let ordered = dependency_order(&resolver, &mod_list)?;
        let installs: Vec<PlannedInstall> = ordered
            .into_iter()
            .map(|package| {
                // Releases replacing an installed one keep its flag
                let auto_installed = registry
                    .installed_record(&package.identifier)
                    .map(|r| r.auto_installed)
                    .unwrap_or_else(|| resolver.is_auto_installed(package));
                let reason = resolver
                    .reasons_for(&package.identifier)
                    .first()
                    .cloned()
                    .unwrap_or(SelectionReason::UserRequested);
                PlannedInstall {
                    package: package.clone(),
                    auto_installed,
                    reason,
                }
            })
            .collect();

        let planned: BTreeSet<&str> = installs.iter().map(|i| i.package.identifier.as_str()).collect();
        let dependencies = installs
            .iter()
            .map(|i| {
                let deps = resolver
                    .resolved_dependencies_of(&i.package.identifier)
                    .into_iter()
                    .filter(|d| planned.contains(d.as_str()))
                    .collect();
                (i.package.identifier.clone(), deps)
            })
            .collect();

        let mut removals = Vec::new();
        if !removing.is_empty() {
            let installing: Vec<Package> = installs.iter().map(|i| i.package.clone()).collect();
            for identifier in registry.reverse_dependencies_of(removing, &installing) {
                if !registry.is_installed(&identifier) {
                    continue;
                }
                let reason = if removing.contains(&identifier) {
                    SelectionReason::UserRequested
                } else {
                    SelectionReason::DependencyRemoved {
                        dependency: removing.join(", "),
                    }
                };
                removals.push(PlannedRemoval { identifier, reason });
            }
            add_orphans(registry, &installing, &mut removals);
        }

        Ok(ChangePlan {
            removals,
            installs,
            dependencies,
        })
    }

    fn check_space(&self, required: u64) -> Result<()> {
        if required == 0 {
            return Ok(());
        }
        let available = self
            .runtime
            .available_space(&self.instance.root)
            .with_context(|| format!("Failed to query free space for {:?}", self.instance.root))?;
        if required > available {
            return Err(ModError::InsufficientSpace {
                path: self.instance.root.clone(),
                required,
                available,
            }
            .into());
        }
        Ok(())
    }

    fn confirm_plan(&self, registry: &Registry, plan: &ChangePlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let mut summary = String::new();
        if !plan.removals.is_empty() {
            summary.push_str("Removing:\n");
            for removal in &plan.removals {
                let version = registry
                    .installed_version(&removal.identifier)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                summary.push_str(&format!(
                    "  - {} {} ({})\n",
                    removal.identifier, version, removal.reason
                ));
            }
        }
        if !plan.installs.is_empty() {
            summary.push_str("Installing:\n");
            for install in &plan.installs {
                let status = if install.package.is_metapackage() || self.cache.is_cached(&install.package) {
                    "cached".to_string()
                } else {
                    match install.package.download_size {
                        Some(size) => format!("{} to download", format_size(size)),
                        None => "to download".to_string(),
                    }
                };
                summary.push_str(&format!(
                    "  + {} ({}, {})\n",
                    install.package, install.reason, status
                ));
            }
        }
        self.user.message(summary.trim_end());

        if !self.user.confirm("Continue?")? {
            return Err(ModError::cancelled("declined by user").into());
        }
        Ok(())
    }

    /// Applies `plan` in one transaction and swaps in the staged registry.
    #[tracing::instrument(skip_all, fields(instance = %self.instance.name))]
    fn execute(&self, registry: &mut Registry, plan: &ChangePlan) -> Result<ChangeReport> {
        let mut staged = registry.clone();
        let mut tx = Transaction::begin(self.runtime, &self.instance.root, self.cancel.clone())?;

        let report = match self.apply(&mut tx, &mut staged, plan) {
            Ok(report) => report,
            Err(err) => {
                if find_mod_error(&err).is_some_and(ModError::is_cancellation) {
                    info!("Stopped, rolling back: {}", err);
                } else {
                    warn!("Rolling back after error: {:#}", err);
                }
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Rollback incomplete: {:#}", rollback_err);
                    return Err(err.context(format!("Rollback incomplete: {:#}", rollback_err)));
                }
                return Err(err);
            }
        };

        let store = RegistryStore::new(self.runtime, self.instance.root.clone());
        let content = RegistryStore::<R>::to_bytes(&staged)?;
        tx.write_file(&store.registry_path(), &content)?;
        tx.commit()?;
        *registry = staged;

        self.enforce_cache_limit(registry);
        Ok(report)
    }

    fn apply(&self, tx: &mut Transaction<'a, R>, staged: &mut Registry, plan: &ChangePlan) -> Result<ChangeReport> {
        let mut report = ChangeReport::default();

        let mut touched = BTreeSet::new();
        for removal in &plan.removals {
            tx.check_cancelled()?;
            let record = staged
                .installed_record(&removal.identifier)
                .ok_or_else(|| ModError::NotInstalled {
                    identifier: removal.identifier.clone(),
                })?;
            self.remove_files(tx, &record, &mut touched)?;
            staged.deregister_package(&removal.identifier)?;
            self.user.message(&format!("Removed {}", record.package));
            report.removed.push(removal.identifier.clone());
        }
        let config_only = self.clean_directories(tx, staged, touched)?;

        self.install_all(tx, staged, plan, &mut report)?;

        // Installs may have put owned files back into a cleaned directory
        report.possible_config_only = config_only
            .into_iter()
            .filter(|dir| !owns_files_under(staged, &report.installed, dir))
            .collect();
        Ok(report)
    }

    /// Installs every planned package, each only after its planned
    /// dependencies.
    ///
    /// Cached packages and metapackages are available at once. The rest are
    /// downloaded, and a finished download waits until its dependencies are
    /// installed. Ready packages go in ascending identifier order.
    fn install_all(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &mut Registry,
        plan: &ChangePlan,
        report: &mut ChangeReport,
    ) -> Result<()> {
        let mut waiting: BTreeMap<&str, &PlannedInstall> = plan
            .installs
            .iter()
            .map(|i| (i.package.identifier.as_str(), i))
            .collect();
        // Identifier -> archive, `None` for metapackages
        let mut available: BTreeMap<String, Option<PathBuf>> = BTreeMap::new();
        let mut downloads = Vec::new();
        for install in &plan.installs {
            let id = install.package.identifier.clone();
            if install.package.is_metapackage() {
                available.insert(id, None);
            } else if let Some(path) = self.cache.cached_path(&install.package) {
                available.insert(id, Some(path));
            } else {
                downloads.push(install);
            }
        }

        let total: u64 = downloads.iter().filter_map(|i| i.package.download_size).sum();
        let mut rate = ByteRateCounter::new(total);
        let feed = if downloads.is_empty() {
            None
        } else {
            let requests = downloads
                .iter()
                .map(|i| DownloadRequest {
                    package: i.package.clone(),
                    target: self.cache.in_progress_path(&i.package),
                })
                .collect();
            rate.start();
            Some(self.downloader.start(requests))
        };

        let mut done = BTreeSet::new();
        loop {
            loop {
                let ready: Vec<&str> = waiting
                    .keys()
                    .copied()
                    .filter(|id| available.contains_key(*id) && plan.is_ready(id, &done))
                    .collect();
                if ready.is_empty() {
                    break;
                }
                for id in ready {
                    tx.check_cancelled()?;
                    let Some(install) = waiting.remove(id) else {
                        continue;
                    };
                    let archive = available.remove(id).flatten();
                    self.install_one(tx, staged, install, archive.as_deref(), report)?;
                    done.insert(id.to_string());
                }
            }
            if waiting.is_empty() {
                return Ok(());
            }

            let Some(feed) = &feed else {
                bail!(
                    "{} cannot be installed after their dependencies",
                    waiting.keys().copied().collect::<Vec<_>>().join(", ")
                );
            };
            tx.check_cancelled()?;
            match feed.recv_timeout(FEED_POLL_INTERVAL) {
                Ok(DownloadEvent::Progress { bytes_left }) => {
                    rate.update(bytes_left);
                    self.user
                        .progress(&format!("Downloading ({})", rate.summary()), rate.percent());
                }
                Ok(DownloadEvent::Completed { package, path }) => {
                    let stored = self
                        .cache
                        .store(&package, &path)
                        .with_context(|| format!("Failed to store download of {}", package))?;
                    if waiting.contains_key(package.identifier.as_str()) {
                        available.insert(package.identifier.clone(), Some(stored));
                    }
                }
                Ok(DownloadEvent::Failed { package, error }) => {
                    return Err(error.context(format!("Failed to download {}", package)));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    let missing: Vec<&str> = waiting
                        .keys()
                        .copied()
                        .filter(|id| !available.contains_key(*id))
                        .collect();
                    bail!("Downloads ended before {} arrived", missing.join(", "));
                }
            }
        }
    }

    fn install_one(
        &self,
        tx: &mut Transaction<'a, R>,
        staged: &mut Registry,
        install: &PlannedInstall,
        archive: Option<&Path>,
        report: &mut ChangeReport,
    ) -> Result<()> {
        let package = &install.package;
        if let Some(version) = staged.installed_version(&package.identifier)
            && version == package.version
        {
            self.user
                .message(&format!("{} is already installed, skipping", package));
            return Ok(());
        }

        let (files, directories) = if package.is_metapackage() {
            (Vec::new(), Vec::new())
        } else {
            let archive = archive.ok_or_else(|| ModError::NotCached {
                package: package.to_string(),
            })?;
            self.check_space(package.install_size.unwrap_or(0))?;
            self.install_files(tx, staged, package, archive)?
        };

        staged.register_package(InstalledPackageRecord::new(
            package.clone(),
            files,
            directories,
            install.auto_installed,
            &self.instance.name,
        ))?;
        self.user.message(&format!("Installed {}", package));
        report.installed.push(package.identifier.clone());
        Ok(())
    }

    fn enforce_cache_limit(&self, registry: &Registry) {
        let Some(limit) = self.cache_size_limit else {
            return;
        };
        let protected: Vec<Package> = registry
            .installed_packages()
            .into_iter()
            .map(|r| r.package)
            .collect();
        match self.cache.enforce_size_limit(limit, &protected) {
            Ok(0) => {}
            Ok(freed) => debug!("Freed {} of cache", format_size(freed)),
            Err(err) => warn!("Failed to trim download cache: {:#}", err),
        }
    }
}

fn reject_dlc<'p>(registry: &Registry, packages: impl Iterator<Item = &'p Package>) -> Result<(), ModError> {
    let dlc = registry.dlc();
    for package in packages {
        if package.is_dlc() || dlc.contains_key(&package.identifier) {
            return Err(ModError::IsDlc {
                identifier: package.identifier.clone(),
            });
        }
    }
    Ok(())
}

fn check_removable(registry: &Registry, identifier: &str) -> Result<(), ModError> {
    let is_dlc = registry.dlc().contains_key(identifier)
        || registry
            .installed_record(identifier)
            .is_some_and(|r| r.package.is_dlc());
    if is_dlc {
        return Err(ModError::IsDlc {
            identifier: identifier.to_string(),
        });
    }
    if !registry.is_installed(identifier) {
        return Err(ModError::NotInstalled {
            identifier: identifier.to_string(),
        });
    }
    Ok(())
}

/// Adds auto-installed packages orphaned by `removals`, until none are left.
fn add_orphans(registry: &Registry, installing: &[Package], removals: &mut Vec<PlannedRemoval>) {
    loop {
        let removing: Vec<String> = removals.iter().map(|r| r.identifier.clone()).collect();
        let orphans: Vec<InstalledPackageRecord> = registry
            .find_removable_auto_installed(installing, &removing)
            .into_iter()
            .filter(|r| !removing.iter().any(|id| id == r.identifier()))
            .collect();
        if orphans.is_empty() {
            return;
        }
        removals.extend(orphans.into_iter().map(|r| PlannedRemoval {
            identifier: r.identifier().to_string(),
            reason: SelectionReason::NoLongerUsed,
        }));
    }
}

/// True if a package in `installed` owns a file under the relative `dir`.
fn owns_files_under(registry: &Registry, installed: &[String], dir: &str) -> bool {
    let dir = Path::new(dir);
    installed
        .iter()
        .filter_map(|id| registry.installed_record(id))
        .flat_map(|r| r.files)
        .any(|f| Path::new(&f).starts_with(dir))
}

/// Installed size added by `plan`, net of what its removals free.
fn net_growth(registry: &Registry, plan: &ChangePlan) -> u64 {
    let added: u64 = plan.installs.iter().filter_map(|i| i.package.install_size).sum();
    let freed: u64 = plan
        .removals
        .iter()
        .filter_map(|r| registry.installed_record(&r.identifier))
        .filter_map(|r| r.package.install_size)
        .sum();
    added.saturating_sub(freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_archives::write_zip;
    use crate::cache::DirectoryCache;
    use crate::download::MockDownloader;
    use crate::package::{InstallStanza, PackageKind};
    use crate::relationship::Relationship;
    use crate::runtime::RealRuntime;
    use crate::test_utils::package;
    use crate::transaction::journal_path;
    use crate::user::{HeadlessUser, MockUser};
    use crate::version::UnmanagedVersion;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        staging: PathBuf,
        instance: GameInstance,
        cache: DirectoryCache<RealRuntime>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().join("game");
            let staging = dir.path().join("staging");
            std::fs::create_dir_all(root.join("GameData")).unwrap();
            std::fs::create_dir_all(&staging).unwrap();
            let instance = GameInstance::new("main", &root);
            let cache = DirectoryCache::new(RealRuntime, dir.path().join("cache"));
            Self {
                _dir: dir,
                root,
                staging,
                instance,
                cache,
            }
        }

        /// Builds a zip for `package` and stores it in the cache.
        fn cache_archive(&self, package: &Package, files: &[(&str, &[u8])]) {
            let path = self.staging.join(package.cache_file_name());
            write_zip(&path, files).unwrap();
            self.cache.store(package, &path).unwrap();
        }

        fn installer<'a>(&'a self, downloader: &'a dyn Downloader, user: &'a dyn User) -> Installer<'a, RealRuntime> {
            Installer::new(&RealRuntime, &self.instance, &self.cache, downloader, user)
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.root.join(relative)
        }
    }

    fn yes() -> HeadlessUser {
        HeadlessUser { assume_yes: true }
    }

    fn interactive_user(answer: bool) -> MockUser {
        let mut user = MockUser::new();
        user.expect_message().returning(|_| ());
        user.expect_warning().returning(|_| ());
        user.expect_progress().returning(|_, _| ());
        user.expect_is_headless().return_const(false);
        user.expect_confirm().returning(move |_| Ok(answer));
        user
    }

    fn depends_on(id: &str, version: &str, deps: &[&str]) -> Package {
        let mut p = package(id, version);
        p.depends = deps.iter().map(|d| Relationship::direct(*d)).collect();
        p
    }

    fn shared_folder_package(id: &str) -> Package {
        let mut p = package(id, "1.0");
        p.install = vec![InstallStanza {
            file: Some("Shared".into()),
            install_to: "GameData".into(),
            ..Default::default()
        }];
        p
    }

    fn mod_error(err: &anyhow::Error) -> &ModError {
        find_mod_error(err).unwrap_or_else(|| panic!("not a ModError: {:#}", err))
    }

    #[test]
    fn test_install_then_uninstall_leaves_nothing() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg"), ("Foo/Plugins/Foo.dll", b"dll")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);

        let report = installer.install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Foo"]);
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "cfg");
        assert!(fx.path("GameData/Foo/Plugins/Foo.dll").exists());
        assert_eq!(registry.file_owner("GameData/Foo/foo.cfg"), Some("Foo".into()));
        assert!(fx.path(".modforge/registry.json").exists());
        assert!(!journal_path(&fx.root).exists());

        let report = installer.uninstall_list(&mut registry, &["Foo".into()])?;
        assert_eq!(report.removed, vec!["Foo"]);
        assert!(registry.installed_packages().is_empty());
        assert_eq!(registry.file_owner("GameData/Foo/foo.cfg"), None);
        assert!(!fx.path("GameData/Foo").exists());
        assert!(fx.path("GameData").exists());
        Ok(())
    }

    #[test]
    fn test_dependencies_are_auto_installed_and_removed_with_their_user() -> Result<()> {
        let fx = Fixture::new();
        let app = depends_on("App", "1.0", &["Lib"]);
        let lib = package("Lib", "1.0");
        fx.cache_archive(&app, &[("App/app.cfg", b"app")]);
        fx.cache_archive(&lib, &[("Lib/lib.cfg", b"lib")]);
        let mut registry = Registry::with_available(vec![app.clone(), lib])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);

        let report = installer.install_list(&mut registry, &[app], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Lib", "App"]);
        assert!(registry.installed_record("Lib").is_some_and(|r| r.auto_installed));
        assert!(registry.installed_record("App").is_some_and(|r| !r.auto_installed));

        let report = installer.uninstall_list(&mut registry, &["App".into()])?;
        assert_eq!(report.removed, vec!["App", "Lib"]);
        assert!(!fx.path("GameData/Lib/lib.cfg").exists());
        Ok(())
    }

    #[test]
    fn test_removing_a_dependency_removes_its_users() -> Result<()> {
        let fx = Fixture::new();
        let app = depends_on("App", "1.0", &["Lib"]);
        let lib = package("Lib", "1.0");
        fx.cache_archive(&app, &[("App/app.cfg", b"app")]);
        fx.cache_archive(&lib, &[("Lib/lib.cfg", b"lib")]);
        let mut registry = Registry::with_available(vec![app.clone(), lib])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);
        installer.install_list(&mut registry, &[app], ResolverOptions::default())?;

        let report = installer.uninstall_list(&mut registry, &["Lib".into()])?;
        assert_eq!(report.removed, vec!["App", "Lib"]);
        assert!(registry.installed_packages().is_empty());
        Ok(())
    }

    #[test]
    fn test_installing_again_is_a_no_op() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);

        installer.install_list(&mut registry, &[foo.clone()], ResolverOptions::default())?;
        let before = registry.installed_record("Foo").map(|r| r.install_time);

        let report = installer.install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert_eq!(report, ChangeReport::default());
        assert_eq!(registry.installed_record("Foo").map(|r| r.install_time), before);
        Ok(())
    }

    #[test]
    fn test_stanza_matching_nothing_writes_nothing() -> Result<()> {
        let fx = Fixture::new();
        let mut foo = package("Foo", "1.0");
        foo.install = vec![InstallStanza {
            find: Some("Missing".into()),
            install_to: "GameData".into(),
            ..Default::default()
        }];
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::Metadata { .. }));
        assert!(!fx.path("GameData/Foo").exists());
        assert!(!registry.is_installed("Foo"));
        assert!(!journal_path(&fx.root).exists());
        Ok(())
    }

    #[test]
    fn test_two_packages_writing_one_path_leave_no_files() -> Result<()> {
        let fx = Fixture::new();
        let a = shared_folder_package("A");
        let b = shared_folder_package("B");
        fx.cache_archive(&a, &[("Shared/common.cfg", b"a"), ("Shared/a.cfg", b"a")]);
        fx.cache_archive(&b, &[("Shared/common.cfg", b"b"), ("Shared/b.cfg", b"b")]);
        let mut registry = Registry::with_available(vec![a.clone(), b.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[a, b], ResolverOptions::default())
            .unwrap_err();
        match mod_error(&err) {
            ModError::FileConflict { path, owner, .. } => {
                assert_eq!(path, &PathBuf::from("GameData/Shared/common.cfg"));
                assert_eq!(owner.as_deref(), Some("A"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!fx.path("GameData/Shared").exists());
        assert!(registry.installed_packages().is_empty());
        assert!(!journal_path(&fx.root).exists());
        Ok(())
    }

    #[test]
    fn test_dlc_is_rejected_before_any_change() -> Result<()> {
        let fx = Fixture::new();
        let mut dlc = package("MakingHistory", "1.0");
        dlc.kind = PackageKind::Dlc;
        let mut registry = Registry::with_available(vec![dlc.clone()])?;
        registry.register_dlc("Serenity", UnmanagedVersion::unknown());
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);

        let err = installer
            .install_list(&mut registry, &[dlc], ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::IsDlc { identifier } if identifier == "MakingHistory"));

        let err = installer.uninstall_list(&mut registry, &["Serenity".into()]).unwrap_err();
        assert!(matches!(mod_error(&err), ModError::IsDlc { .. }));
        assert!(!fx.path(".modforge").exists());
        Ok(())
    }

    #[test]
    fn test_removing_unknown_package_fails() {
        let fx = Fixture::new();
        let mut registry = Registry::new();
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .uninstall_list(&mut registry, &["Ghost".into()])
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::NotInstalled { identifier } if identifier == "Ghost"));
    }

    #[test]
    fn test_declining_cancels_without_changes() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = interactive_user(false);

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        assert!(mod_error(&err).is_cancellation());
        assert!(!fx.path("GameData/Foo").exists());
        assert!(!fx.path(".modforge").exists());
        Ok(())
    }

    #[test_log::test]
    fn test_cancelled_token_rolls_back() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .installer(&downloader, &user)
            .with_cancel(cancel)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        assert!(mod_error(&err).is_cancellation());
        assert!(!fx.path("GameData/Foo").exists());
        assert!(!registry.is_installed("Foo"));
        assert!(!journal_path(&fx.root).exists());
        Ok(())
    }

    #[test]
    fn test_unowned_file_conflicts_when_headless() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"new")]);
        std::fs::create_dir_all(fx.path("GameData/Foo"))?;
        std::fs::write(fx.path("GameData/Foo/foo.cfg"), b"mine")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::FileConflict { owner: None, .. }));
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "mine");
        Ok(())
    }

    #[test]
    fn test_unowned_file_is_overwritten_after_confirmation() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"new")]);
        std::fs::create_dir_all(fx.path("GameData/Foo"))?;
        std::fs::write(fx.path("GameData/Foo/foo.cfg"), b"mine")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = interactive_user(true);

        fx.installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "new");
        assert_eq!(registry.file_owner("GameData/Foo/foo.cfg"), Some("Foo".into()));
        Ok(())
    }

    #[test]
    fn test_identical_unowned_file_is_adopted() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"same")]);
        std::fs::create_dir_all(fx.path("GameData/Foo"))?;
        std::fs::write(fx.path("GameData/Foo/foo.cfg"), b"same")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        fx.installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert_eq!(registry.file_owner("GameData/Foo/foo.cfg"), Some("Foo".into()));
        Ok(())
    }

    #[test]
    fn test_manual_binary_elsewhere_is_a_location_mismatch() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/Plugins/Foo.dll", b"dll")]);
        std::fs::create_dir_all(fx.path("GameData/Elsewhere"))?;
        std::fs::write(fx.path("GameData/Elsewhere/Foo.dll"), b"old")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        registry.register_manual_binary("Foo", "GameData/Elsewhere/Foo.dll");
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        match mod_error(&err) {
            ModError::LocationMismatch { identifier, path } => {
                assert_eq!(identifier, "Foo");
                assert_eq!(path, &fx.path("GameData/Elsewhere/Foo.dll"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(fx.path("GameData/Elsewhere/Foo.dll").exists());
        Ok(())
    }

    #[test]
    fn test_manual_binary_in_place_is_taken_over() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/Plugins/Foo.dll", b"managed")]);
        std::fs::create_dir_all(fx.path("GameData/Foo/Plugins"))?;
        std::fs::write(fx.path("GameData/Foo/Plugins/Foo.dll"), b"manual")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        registry.register_manual_binary("Foo", "GameData/Foo/Plugins/Foo.dll");
        let downloader = MockDownloader::new();
        let user = yes();

        fx.installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/Plugins/Foo.dll"))?, "managed");
        assert_eq!(registry.manual_binary_path("Foo"), None);
        assert!(registry.is_installed("Foo"));
        Ok(())
    }

    #[test]
    fn test_upgrade_swaps_files_and_keeps_auto_flag() -> Result<()> {
        let fx = Fixture::new();
        let app = depends_on("App", "1.0", &["Lib"]);
        let lib1 = package("Lib", "1.0");
        let lib2 = package("Lib", "2.0");
        fx.cache_archive(&app, &[("App/app.cfg", b"app")]);
        fx.cache_archive(&lib1, &[("Lib/old.cfg", b"1")]);
        fx.cache_archive(&lib2, &[("Lib/new.cfg", b"2")]);
        let mut registry = Registry::with_available(vec![app.clone(), lib1, lib2.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);
        installer.install_list(&mut registry, &[app], ResolverOptions::depends_only())?;

        let report = installer.upgrade(&mut registry, &[lib2], ResolverOptions::depends_only())?;
        assert_eq!(report.removed, vec!["Lib"]);
        assert_eq!(report.installed, vec!["Lib"]);
        assert!(!fx.path("GameData/Lib/old.cfg").exists());
        assert!(fx.path("GameData/Lib/new.cfg").exists());
        let record = registry.installed_record("Lib").unwrap();
        assert_eq!(record.package.version.to_string(), "2.0");
        assert!(record.auto_installed);
        assert!(registry.is_installed("App"));
        Ok(())
    }

    #[test]
    fn test_downgrade_warns() -> Result<()> {
        let fx = Fixture::new();
        let foo1 = package("Foo", "1.0");
        let foo2 = package("Foo", "2.0");
        fx.cache_archive(&foo1, &[("Foo/foo.cfg", b"1")]);
        fx.cache_archive(&foo2, &[("Foo/foo.cfg", b"2")]);
        let mut registry = Registry::with_available(vec![foo1.clone(), foo2.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        fx.installer(&downloader, &user)
            .install_list(&mut registry, &[foo2], ResolverOptions::default())?;

        let mut user = MockUser::new();
        user.expect_message().returning(|_| ());
        user.expect_confirm().returning(|_| Ok(true));
        user.expect_is_headless().return_const(false);
        user.expect_warning()
            .withf(|text| text.contains("downgraded"))
            .times(1)
            .returning(|_| ());
        fx.installer(&downloader, &user)
            .upgrade(&mut registry, &[foo1], ResolverOptions::default())?;
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "1");
        Ok(())
    }

    #[test]
    fn test_replace_swaps_packages() -> Result<()> {
        let fx = Fixture::new();
        let old = package("Old", "1.0");
        let new = package("New", "1.0");
        fx.cache_archive(&old, &[("Old/old.cfg", b"old")]);
        fx.cache_archive(&new, &[("New/new.cfg", b"new")]);
        let mut registry = Registry::with_available(vec![old.clone(), new.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);
        installer.install_list(&mut registry, &[old], ResolverOptions::default())?;

        let report = installer.replace(&mut registry, "Old", &new, ResolverOptions::default())?;
        assert_eq!(report.removed, vec!["Old"]);
        assert_eq!(report.installed, vec!["New"]);
        assert!(!fx.path("GameData/Old").exists());
        assert!(registry.installed_record("New").is_some_and(|r| !r.auto_installed));

        let err = installer
            .replace(&mut registry, "Old", &new, ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::NotInstalled { .. }));
        Ok(())
    }

    #[test]
    fn test_downloads_are_stored_and_installed() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let mut downloader = MockDownloader::new();
        downloader.expect_start().times(1).returning(|requests| {
            let (tx, rx) = mpsc::channel();
            for request in requests {
                std::fs::create_dir_all(request.target.parent().unwrap()).unwrap();
                write_zip(&request.target, &[("Foo/foo.cfg", b"downloaded")]).unwrap();
                tx.send(DownloadEvent::Progress { bytes_left: 0 }).unwrap();
                tx.send(DownloadEvent::Completed {
                    package: request.package,
                    path: request.target,
                })
                .unwrap();
            }
            rx
        });
        let user = yes();

        let report = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo.clone()], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Foo"]);
        assert!(fx.cache.is_cached(&foo));
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "downloaded");
        Ok(())
    }

    #[test_log::test]
    fn test_failed_download_rolls_back_whole_batch() -> Result<()> {
        let fx = Fixture::new();
        let cached = package("Cached", "1.0");
        let remote = package("Remote", "1.0");
        fx.cache_archive(&cached, &[("Cached/a.cfg", b"a")]);
        let mut registry = Registry::with_available(vec![cached.clone(), remote.clone()])?;
        let mut downloader = MockDownloader::new();
        downloader.expect_start().returning(|requests| {
            let (tx, rx) = mpsc::channel();
            for request in requests {
                tx.send(DownloadEvent::Failed {
                    package: request.package,
                    error: anyhow::anyhow!("HTTP 404"),
                })
                .unwrap();
            }
            rx
        });
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[cached, remote], ResolverOptions::default())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to download Remote 1.0"));
        assert!(!fx.path("GameData/Cached").exists());
        assert!(registry.installed_packages().is_empty());
        Ok(())
    }

    #[test]
    fn test_uninstall_cleans_leftovers_and_reports_config_dirs() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);
        installer.install_list(&mut registry, &[foo], ResolverOptions::default())?;

        std::fs::write(fx.path("GameData/Foo/settings.cfg"), b"user")?;
        std::fs::create_dir_all(fx.path("GameData/Foo/@thumbs"))?;
        std::fs::write(fx.path("GameData/Foo/@thumbs/foo.png"), b"png")?;

        let report = installer.uninstall_list(&mut registry, &["Foo".into()])?;
        assert_eq!(report.possible_config_only, vec!["GameData/Foo"]);
        assert!(!fx.path("GameData/Foo/@thumbs").exists());
        assert!(fx.path("GameData/Foo/settings.cfg").exists());
        Ok(())
    }

    #[test]
    fn test_insufficient_space() -> Result<()> {
        let fx = Fixture::new();
        let mut huge = package("Huge", "1.0");
        huge.install_size = Some(u64::MAX);
        let mut registry = Registry::with_available(vec![huge.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[huge], ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::InsufficientSpace { required: u64::MAX, .. }));
        Ok(())
    }

    #[test]
    fn test_install_filters_skip_destinations() -> Result<()> {
        let mut fx = Fixture::new();
        fx.instance = fx.instance.clone().with_install_filters(vec!["Thumbs.db".into()]);
        let foo = package("Foo", "1.0");
        fx.cache_archive(
            &foo,
            &[("Foo/foo.cfg", b"cfg"), ("Foo/readme.txt", b"txt"), ("Foo/Thumbs.db", b"db")],
        );
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        fx.installer(&downloader, &user)
            .with_global_filters(vec![".txt".into()])
            .install_list(&mut registry, &[foo], ResolverOptions::default())?;
        assert!(fx.path("GameData/Foo/foo.cfg").exists());
        assert!(!fx.path("GameData/Foo/readme.txt").exists());
        assert!(!fx.path("GameData/Foo/Thumbs.db").exists());
        Ok(())
    }

    #[test]
    fn test_metapackage_installs_dependencies_only() -> Result<()> {
        let fx = Fixture::new();
        let mut pack = depends_on("Pack", "1.0", &["Foo"]);
        pack.kind = PackageKind::Metapackage;
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        let mut registry = Registry::with_available(vec![pack.clone(), foo])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let report = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[pack], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Foo", "Pack"]);
        assert!(registry.installed_record("Pack").is_some_and(|r| r.files.is_empty()));
        assert!(fx.path("GameData/Foo/foo.cfg").exists());
        Ok(())
    }

    #[test]
    fn test_cache_limit_keeps_installed_archives() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        let unused = package("Unused", "1.0");
        fx.cache_archive(&foo, &[("Foo/foo.cfg", b"cfg")]);
        fx.cache_archive(&unused, &[("Unused/u.cfg", b"u")]);
        let mut registry = Registry::with_available(vec![foo.clone(), unused.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();

        fx.installer(&downloader, &user)
            .with_cache_size_limit(Some(0))
            .install_list(&mut registry, &[foo.clone()], ResolverOptions::default())?;
        assert!(fx.cache.is_cached(&foo));
        assert!(!fx.cache.is_cached(&unused));
        Ok(())
    }

    /// Serves every request with a zip holding `<id>/<id>.cfg`, delivered
    /// in identifier order.
    fn serving_downloader() -> MockDownloader {
        let mut downloader = MockDownloader::new();
        downloader.expect_start().returning(|mut requests| {
            requests.sort_by(|a: &DownloadRequest, b: &DownloadRequest| {
                a.package.identifier.cmp(&b.package.identifier)
            });
            let (tx, rx) = mpsc::channel();
            for request in requests {
                let id = request.package.identifier.clone();
                let name = format!("{}/{}.cfg", id, id);
                std::fs::create_dir_all(request.target.parent().unwrap()).unwrap();
                write_zip(&request.target, &[(name.as_str(), id.as_bytes())]).unwrap();
                tx.send(DownloadEvent::Completed {
                    package: request.package,
                    path: request.target,
                })
                .unwrap();
            }
            rx
        });
        downloader
    }

    #[test]
    fn test_cached_package_waits_for_downloaded_dependency() -> Result<()> {
        let fx = Fixture::new();
        let app = depends_on("App", "1.0", &["Lib"]);
        let lib = package("Lib", "1.0");
        fx.cache_archive(&app, &[("App/App.cfg", b"App")]);
        let mut registry = Registry::with_available(vec![app.clone(), lib.clone()])?;
        let downloader = serving_downloader();
        let user = yes();

        let report = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[app], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Lib", "App"]);
        assert!(fx.cache.is_cached(&lib));
        assert!(fx.path("GameData/Lib/Lib.cfg").exists());
        Ok(())
    }

    #[test]
    fn test_download_arriving_early_waits_for_its_dependency() -> Result<()> {
        let fx = Fixture::new();
        // "App" is delivered before "Lib"
        let app = depends_on("App", "1.0", &["Lib"]);
        let lib = package("Lib", "1.0");
        let mut registry = Registry::with_available(vec![app.clone(), lib])?;
        let downloader = serving_downloader();
        let user = yes();

        let report = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[app], ResolverOptions::default())?;
        assert_eq!(report.installed, vec!["Lib", "App"]);
        assert_eq!(std::fs::read_to_string(fx.path("GameData/App/App.cfg"))?, "App");
        Ok(())
    }

    #[test]
    fn test_plan_lists_planned_dependencies() -> Result<()> {
        let fx = Fixture::new();
        let app = depends_on("App", "1.0", &["Lib"]);
        let registry = Registry::with_available(vec![app.clone(), package("Lib", "1.0")])?;
        let downloader = MockDownloader::new();
        let user = yes();

        let plan = fx
            .installer(&downloader, &user)
            .plan(&registry, &[app], &[], ResolverOptions::default())?;
        let mut done = BTreeSet::new();
        assert!(plan.is_ready("Lib", &done));
        assert!(!plan.is_ready("App", &done));
        done.insert("Lib".to_string());
        assert!(plan.is_ready("App", &done));
        Ok(())
    }

    #[test]
    fn test_unrelated_file_next_to_manual_binary_is_a_location_mismatch() -> Result<()> {
        let fx = Fixture::new();
        let foo = package("Foo", "1.0");
        fx.cache_archive(&foo, &[("Foo/Plugins/Foo.dll", b"dll"), ("Foo/readme.md", b"md")]);
        std::fs::create_dir_all(fx.path("GameData/Foo"))?;
        std::fs::write(fx.path("GameData/Foo/Foo.dll"), b"manual")?;
        let mut registry = Registry::with_available(vec![foo.clone()])?;
        registry.register_manual_binary("Foo", "GameData/Foo/Foo.dll");
        let downloader = MockDownloader::new();
        let user = yes();

        let err = fx
            .installer(&downloader, &user)
            .install_list(&mut registry, &[foo], ResolverOptions::default())
            .unwrap_err();
        assert!(matches!(mod_error(&err), ModError::LocationMismatch { identifier, .. } if identifier == "Foo"));
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/Foo.dll"))?, "manual");
        assert!(!fx.path("GameData/Foo/readme.md").exists());
        Ok(())
    }

    #[test]
    fn test_upgrade_does_not_report_repopulated_dir_as_config_only() -> Result<()> {
        let fx = Fixture::new();
        let foo1 = package("Foo", "1.0");
        let foo2 = package("Foo", "2.0");
        fx.cache_archive(&foo1, &[("Foo/foo.cfg", b"1")]);
        fx.cache_archive(&foo2, &[("Foo/foo.cfg", b"2")]);
        let mut registry = Registry::with_available(vec![foo1.clone(), foo2.clone()])?;
        let downloader = MockDownloader::new();
        let user = yes();
        let installer = fx.installer(&downloader, &user);
        installer.install_list(&mut registry, &[foo1], ResolverOptions::default())?;
        std::fs::write(fx.path("GameData/Foo/settings.cfg"), b"user")?;

        let report = installer.upgrade(&mut registry, &[foo2], ResolverOptions::default())?;
        assert!(report.possible_config_only.is_empty());
        assert_eq!(std::fs::read_to_string(fx.path("GameData/Foo/foo.cfg"))?, "2");
        assert!(fx.path("GameData/Foo/settings.cfg").exists());
        Ok(())
    }

    #[test]
    fn test_change_kind() {
        let v1 = package("Foo", "1.0");
        let v2 = package("Foo", "2.0");
        assert_eq!(ChangeKind::classify(None, &v1), ChangeKind::Install);
        assert_eq!(ChangeKind::classify(Some(&v1), &v1), ChangeKind::Reinstall);
        assert_eq!(ChangeKind::classify(Some(&v1), &v2), ChangeKind::Upgrade);
        assert_eq!(ChangeKind::classify(Some(&v2), &v1), ChangeKind::Downgrade);
    }
}
