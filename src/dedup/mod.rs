//! Sharing identical package files between instances through hard links.
//!
//! Instances are grouped by the device their root lives on, since hard links
//! cannot cross filesystems. Within a group, the same relative path of the
//! same package release is assumed to be the same file. Contents are still
//! compared before anything is relinked.

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::error::{ModError, format_size};
use crate::index::{PackageIndex, Registry};
use crate::package::{InstalledPackageRecord, Package};
use crate::runtime::{FileIdentity, Runtime};
use crate::transaction::Transaction;
use crate::user::User;

/// Files smaller than this are never linked.
pub const MIN_DEDUP_FILE_SIZE: u64 = 128 * 1024;

/// Installed state of one instance, as seen by the deduplicator.
#[derive(Debug, Clone)]
pub struct InstanceFiles {
    pub name: String,
    pub root: PathBuf,
    pub records: Vec<InstalledPackageRecord>,
}

impl InstanceFiles {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, registry: &Registry) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            records: registry.installed_packages(),
        }
    }

    fn record(&self, package: &Package) -> Option<&InstalledPackageRecord> {
        self.records
            .iter()
            .find(|r| r.package.identifier == package.identifier && r.package.version == package.version)
    }
}

/// Outcome of [`Deduplicator::deduplicate_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub files_relinked: usize,
    pub bytes_reclaimed: u64,
}

/// One planned relink: `duplicate` is replaced by a link to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relink {
    pub target: PathBuf,
    pub duplicate: PathBuf,
    /// Instance root holding `duplicate`; its journal records the change.
    pub instance_root: PathBuf,
    pub size: u64,
}

pub struct Deduplicator<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    instances: Vec<InstanceFiles>,
}

impl<'a, R: Runtime + ?Sized> Deduplicator<'a, R> {
    pub fn new(runtime: &'a R, instances: Vec<InstanceFiles>) -> Self {
        Self { runtime, instances }
    }

    fn device_of(&self, root: &Path) -> Option<u64> {
        self.runtime.file_identity(root).ok().map(|id| id.device)
    }

    fn device_groups(&self) -> BTreeMap<u64, Vec<&InstanceFiles>> {
        let mut groups: BTreeMap<u64, Vec<&InstanceFiles>> = BTreeMap::new();
        for instance in &self.instances {
            match self.device_of(&instance.root) {
                Some(device) => groups.entry(device).or_default().push(instance),
                None => debug!("Skipping instance {} with unreadable root", instance.name),
            }
        }
        groups
    }

    /// Existing copies of `package`'s files in other instances on the same
    /// device as `destination_root`, keyed by relative path.
    pub fn candidates(&self, destination_root: &Path, package: &Package) -> BTreeMap<String, Vec<PathBuf>> {
        let mut candidates: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let Some(device) = self.device_of(destination_root) else {
            return candidates;
        };
        for instance in &self.instances {
            if instance.root == destination_root || self.device_of(&instance.root) != Some(device) {
                continue;
            }
            if let Some(record) = instance.record(package) {
                for file in &record.files {
                    candidates
                        .entry(file.clone())
                        .or_default()
                        .push(instance.root.join(file));
                }
            }
        }
        candidates
    }

    /// Finds copies of the same file that are not yet linked together.
    #[tracing::instrument(skip(self))]
    pub fn plan(&self) -> Result<Vec<Relink>> {
        let mut relinks = Vec::new();
        for (device, instances) in self.device_groups() {
            // (identifier, version, relative path) -> copies as (instance root, absolute path)
            let mut copies: BTreeMap<(String, String, String), Vec<(&Path, PathBuf)>> = BTreeMap::new();
            for instance in &instances {
                for record in &instance.records {
                    for file in &record.files {
                        copies
                            .entry((
                                record.package.identifier.clone(),
                                record.package.version.to_string(),
                                file.clone(),
                            ))
                            .or_default()
                            .push((instance.root.as_path(), instance.root.join(file)));
                    }
                }
            }

            for ((identifier, _, relative), paths) in copies {
                if paths.len() < 2 {
                    continue;
                }
                let mut stated: Vec<(&Path, PathBuf, FileIdentity)> = paths
                    .into_iter()
                    .filter_map(|(root, path)| {
                        let identity = self.runtime.file_identity(&path).ok()?;
                        (identity.size >= MIN_DEDUP_FILE_SIZE && identity.device == device)
                            .then_some((root, path, identity))
                    })
                    .collect();
                // Most linked copy first, so existing links are kept
                stated.sort_by(|a, b| b.2.link_count.cmp(&a.2.link_count).then_with(|| a.1.cmp(&b.1)));

                let Some((_, target, target_id)) = stated.first().cloned() else {
                    continue;
                };
                for (root, path, identity) in stated.into_iter().skip(1) {
                    if identity.same_file(&target_id) || identity.size != target_id.size {
                        continue;
                    }
                    if !self.same_contents(&target, &path)? {
                        debug!("{} differs between {:?} and {:?}", relative, target, path);
                        continue;
                    }
                    debug!("{}: {} can be linked to {:?}", identifier, relative, target);
                    relinks.push(Relink {
                        target: target.clone(),
                        duplicate: path,
                        instance_root: root.to_path_buf(),
                        size: identity.size,
                    });
                }
            }
        }
        Ok(relinks)
    }

    fn same_contents(&self, a: &Path, b: &Path) -> Result<bool> {
        let mut left = self.runtime.open(a)?;
        let mut right = self.runtime.open(b)?;
        contents_equal(&mut left, &mut right)
    }

    /// Replaces every duplicate copy with a hard link, after confirmation.
    ///
    /// Each instance gets its own journaled transaction. Every relink is
    /// applied before any transaction commits, so a failure or cancellation
    /// while relinking rolls back all instances. Committing only discards
    /// journals; if one commit fails, the instances committed before it keep
    /// their links and the failed one is reverted to separate copies by the
    /// next `recover`. Both states hold identical contents.
    #[tracing::instrument(skip(self, user, cancel))]
    pub fn deduplicate_all(&self, user: &dyn User, cancel: CancellationToken) -> Result<DedupReport> {
        let relinks = self.plan()?;
        if relinks.is_empty() {
            user.message("No duplicate files found");
            return Ok(DedupReport::default());
        }

        let reclaimable: u64 = relinks.iter().map(|r| r.size).sum();
        user.message(&format!(
            "{} duplicate files can be hard-linked, saving up to {}",
            relinks.len(),
            format_size(reclaimable)
        ));
        if !user.confirm("Link duplicate files?")? {
            return Err(ModError::cancelled("deduplication declined").into());
        }

        let mut transactions: BTreeMap<PathBuf, Transaction<'a, R>> = BTreeMap::new();
        let mut report = DedupReport::default();
        for relink in &relinks {
            if !transactions.contains_key(&relink.instance_root) {
                let tx = Transaction::begin(self.runtime, &relink.instance_root, cancel.clone())?;
                transactions.insert(relink.instance_root.clone(), tx);
            }
            let Some(tx) = transactions.get_mut(&relink.instance_root) else {
                continue;
            };
            tx.check_cancelled()?;
            // Copies that shared an inode with the duplicate keep their space
            let before = self.runtime.file_identity(&relink.duplicate)?;
            tx.delete_file(&relink.duplicate)?;
            tx.hard_link(&relink.target, &relink.duplicate)
                .with_context(|| format!("Failed to link {:?} to {:?}", relink.duplicate, relink.target))?;
            report.files_relinked += 1;
            if before.link_count <= 1 {
                report.bytes_reclaimed += relink.size;
            }
        }

        for (root, tx) in transactions {
            tx.commit()
                .with_context(|| format!("Failed to commit relinks in {:?}", root))?;
        }
        info!(
            "Linked {} files, reclaimed {}",
            report.files_relinked,
            format_size(report.bytes_reclaimed)
        );
        user.message(&format!(
            "Linked {} files, reclaimed {}",
            report.files_relinked,
            format_size(report.bytes_reclaimed)
        ));
        Ok(report)
    }
}

/// Compares two streams byte for byte.
pub fn contents_equal(a: &mut dyn Read, b: &mut dyn Read) -> Result<bool> {
    let mut left = [0u8; 8192];
    let mut right = [0u8; 8192];
    loop {
        let n = read_full(a, &mut left)?;
        let m = read_full(b, &mut right)?;
        if n != m || left[..n] != right[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fills `buf` as far as the stream allows.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
