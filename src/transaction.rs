//! All-or-nothing filesystem changes backed by a write-ahead journal.
//!
//! Every operation is appended to `<instance>/.modforge/tx/journal.jsonl`
//! before it is performed. Deleted and overwritten files are moved into the
//! transaction directory instead of being removed, so the journal can always
//! be replayed backwards.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::error::ModError;
use crate::index::STATE_DIR;
use crate::runtime::Runtime;

/// One journaled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    CreatedFile { path: PathBuf },
    CreatedDir { path: PathBuf },
    /// File moved aside to `backup`.
    Deleted { path: PathBuf, backup: PathBuf },
    RemovedDir { path: PathBuf },
    /// Previous content moved aside to `backup` before writing new content.
    Replaced { path: PathBuf, backup: PathBuf },
}

impl JournalEntry {
    pub fn path(&self) -> &Path {
        match self {
            JournalEntry::CreatedFile { path }
            | JournalEntry::CreatedDir { path }
            | JournalEntry::Deleted { path, .. }
            | JournalEntry::RemovedDir { path }
            | JournalEntry::Replaced { path, .. } => path,
        }
    }
}

/// Returns: `<instance>/.modforge/tx`
pub fn transaction_dir(instance_root: &Path) -> PathBuf {
    instance_root.join(STATE_DIR).join("tx")
}

/// Returns: `<instance>/.modforge/tx/journal.jsonl`
pub fn journal_path(instance_root: &Path) -> PathBuf {
    transaction_dir(instance_root).join("journal.jsonl")
}

/// An open filesystem transaction on one instance.
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back.
pub struct Transaction<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    tx_dir: PathBuf,
    entries: Vec<JournalEntry>,
    cancel: CancellationToken,
    backups: usize,
    finished: bool,
}

impl<'a, R: Runtime + ?Sized> Transaction<'a, R> {
    /// Starts a transaction. Fails if an earlier one was left unfinished.
    #[tracing::instrument(skip(runtime, cancel))]
    pub fn begin(runtime: &'a R, instance_root: &Path, cancel: CancellationToken) -> Result<Self> {
        let tx_dir = transaction_dir(instance_root);
        let journal = journal_path(instance_root);
        if runtime.exists(&journal) {
            bail!(
                "An unfinished transaction was found at {:?}; run `modforge recover` first",
                journal
            );
        }
        runtime
            .create_dir_all(&tx_dir)
            .with_context(|| format!("Failed to create transaction directory {:?}", tx_dir))?;
        runtime.write(&journal, b"")?;
        debug!("Transaction started in {:?}", tx_dir);

        Ok(Self {
            runtime,
            tx_dir,
            entries: Vec::new(),
            cancel,
            backups: 0,
            finished: false,
        })
    }

    /// Fails with [`ModError::Cancelled`] once the token has been tripped.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ModError::Cancelled { reason: None }.into());
        }
        Ok(())
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    fn record(&mut self, entry: JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.runtime
            .append(&self.tx_dir.join("journal.jsonl"), line.as_bytes())
            .context("Failed to write transaction journal")?;
        self.entries.push(entry);
        Ok(())
    }

    fn next_backup(&mut self) -> PathBuf {
        self.backups += 1;
        self.tx_dir.join(format!("backup-{}", self.backups))
    }

    /// Creates `path` and any missing parents, journaling each new directory.
    pub fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        let mut missing: Vec<&Path> = path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !self.runtime.exists(p))
            .collect();
        missing.reverse();
        for dir in missing {
            self.record(JournalEntry::CreatedDir {
                path: dir.to_path_buf(),
            })?;
            self.runtime.create_dir_all(dir)?;
        }
        Ok(())
    }

    fn ensure_parent(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Writes `contents` to `path`, keeping any previous content for rollback.
    pub fn write_file(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        self.ensure_parent(path)?;
        if self.runtime.exists(path) {
            let backup = self.next_backup();
            self.record(JournalEntry::Replaced {
                path: path.to_path_buf(),
                backup: backup.clone(),
            })?;
            self.runtime.rename(path, &backup)?;
        } else {
            self.record(JournalEntry::CreatedFile {
                path: path.to_path_buf(),
            })?;
        }
        self.runtime
            .write(path, contents)
            .with_context(|| format!("Failed to write {:?}", path))
    }

    /// Creates a new file at `path` from `reader`. The file must not exist.
    pub fn create_from_reader(&mut self, path: &Path, reader: &mut dyn Read) -> Result<u64> {
        if self.runtime.exists(path) {
            bail!("Refusing to overwrite existing file {:?}", path);
        }
        self.ensure_parent(path)?;
        self.record(JournalEntry::CreatedFile {
            path: path.to_path_buf(),
        })?;
        let mut writer = self
            .runtime
            .create_file(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        let written = std::io::copy(reader, &mut writer)
            .with_context(|| format!("Failed to write {:?}", path))?;
        writer.flush()?;
        Ok(written)
    }

    /// Creates `link` as a hard link to `original`. `link` must not exist.
    pub fn hard_link(&mut self, original: &Path, link: &Path) -> Result<()> {
        self.ensure_parent(link)?;
        self.record(JournalEntry::CreatedFile {
            path: link.to_path_buf(),
        })?;
        self.runtime.hard_link(original, link)
    }

    /// Moves `path` aside; it is gone for good on commit.
    pub fn delete_file(&mut self, path: &Path) -> Result<()> {
        let backup = self.next_backup();
        self.record(JournalEntry::Deleted {
            path: path.to_path_buf(),
            backup: backup.clone(),
        })?;
        if let Err(err) = self.runtime.rename(path, &backup) {
            // Nothing was moved, so there is nothing to restore
            self.entries.pop();
            return Err(err.context(format!("Failed to delete {:?}", path)));
        }
        Ok(())
    }

    /// Removes an empty directory.
    pub fn remove_dir(&mut self, path: &Path) -> Result<()> {
        self.record(JournalEntry::RemovedDir {
            path: path.to_path_buf(),
        })?;
        self.runtime.remove_dir(path)
    }

    /// Makes every change permanent and discards the journal and backups.
    #[tracing::instrument(skip(self))]
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.runtime
            .remove_dir_all(&self.tx_dir)
            .context("Failed to discard transaction journal")?;
        debug!("Transaction committed ({} operations)", self.entries.len());
        Ok(())
    }

    /// Undoes every change made so far.
    ///
    /// If some operation cannot be undone, the journal is rewritten to hold
    /// just those operations and their backups are kept, so a later
    /// [`Transaction::recover`] can finish the job.
    #[tracing::instrument(skip(self))]
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo()
    }

    fn undo(&mut self) -> Result<()> {
        let entries = std::mem::take(&mut self.entries);
        info!("Rolling back {} operations", entries.len());
        let failed = replay_backwards(self.runtime, &entries);
        finish_replay(self.runtime, &self.tx_dir, &failed)
    }

    /// Replays a journal left behind by an interrupted process.
    ///
    /// Returns true if there was one.
    #[tracing::instrument(skip(runtime))]
    pub fn recover(runtime: &R, instance_root: &Path) -> Result<bool> {
        let journal = journal_path(instance_root);
        if !runtime.exists(&journal) {
            return Ok(false);
        }
        let content = runtime
            .read_to_string(&journal)
            .with_context(|| format!("Failed to read journal {:?}", journal))?;
        let entries: Vec<JournalEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    // A torn final line means the operation never started
                    warn!("Skipping unreadable journal line {:?}: {}", line, err);
                    None
                }
            })
            .collect();

        info!("Recovering {} journaled operations in {:?}", entries.len(), instance_root);
        let failed = replay_backwards(runtime, &entries);
        finish_replay(runtime, &transaction_dir(instance_root), &failed)?;
        Ok(true)
    }
}

impl<R: Runtime + ?Sized> Drop for Transaction<'_, R> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Err(err) = self.undo() {
                warn!("Rollback of abandoned transaction failed: {:#}", err);
            }
        }
    }
}

/// Undoes `entries` newest first and returns the ones that failed, oldest
/// first.
fn replay_backwards<R: Runtime + ?Sized>(runtime: &R, entries: &[JournalEntry]) -> Vec<JournalEntry> {
    let mut failed = Vec::new();
    for entry in entries.iter().rev() {
        if let Err(err) = undo_entry(runtime, entry) {
            warn!("Could not undo {:?}: {:#}", entry, err);
            failed.push(entry.clone());
        }
    }
    failed.reverse();
    failed
}

/// Discards the transaction directory, or keeps it with a journal of just
/// the `failed` entries.
fn finish_replay<R: Runtime + ?Sized>(runtime: &R, tx_dir: &Path, failed: &[JournalEntry]) -> Result<()> {
    if failed.is_empty() {
        return runtime
            .remove_dir_all(tx_dir)
            .context("Failed to discard transaction journal");
    }

    let mut journal = String::new();
    for entry in failed {
        journal.push_str(&serde_json::to_string(entry)?);
        journal.push('\n');
    }
    runtime
        .write(&tx_dir.join("journal.jsonl"), journal.as_bytes())
        .context("Failed to rewrite transaction journal")?;
    bail!(
        "{} operations could not be undone; backups are kept in {:?}, run `modforge recover` once they are accessible",
        failed.len(),
        tx_dir
    )
}

fn undo_entry<R: Runtime + ?Sized>(runtime: &R, entry: &JournalEntry) -> Result<()> {
    match entry {
        JournalEntry::CreatedFile { path } => {
            if runtime.exists(path) {
                runtime.remove_file(path)?;
            }
        }
        JournalEntry::CreatedDir { path } => {
            if runtime.is_dir(path) {
                runtime.remove_dir(path)?;
            }
        }
        JournalEntry::Deleted { path, backup } | JournalEntry::Replaced { path, backup } => {
            if runtime.exists(backup) {
                if runtime.exists(path) {
                    runtime.remove_file(path)?;
                }
                runtime.rename(backup, path)?;
            }
        }
        JournalEntry::RemovedDir { path } => {
            if !runtime.exists(path) {
                runtime.create_dir_all(path)?;
            }
        }
    }
    Ok(())
}
