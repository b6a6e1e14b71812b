//! File system operations (read, write, links, metadata, free space).

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{FileIdentity, RealRuntime};

impl RealRuntime {
    #[tracing::instrument(skip(self, contents))]
    pub(crate) fn write_impl(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).context("Failed to write to file")?;
        Ok(())
    }

    #[tracing::instrument(skip(self, contents))]
    pub(crate) fn append_impl(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open file for appending")?;
        file.write_all(contents).context("Failed to append to file")?;
        file.sync_data().context("Failed to flush appended data")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_to_string_impl(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).context("Failed to read file to string")
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn rename_impl(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).context("Failed to rename file")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn hard_link_impl(&self, original: &Path, link: &Path) -> Result<()> {
        fs::hard_link(original, link).context("Failed to create hard link")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_dir_all_impl(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).context("Failed to create directory")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_file_impl(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).context("Failed to remove file")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_dir_impl(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).context("Failed to remove directory")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn remove_dir_all_impl(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).context("Failed to remove directory and its contents")?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn exists_impl(&self, path: &Path) -> bool {
        path.exists()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn is_dir_impl(&self, path: &Path) -> bool {
        path.is_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn read_dir_impl(&self, path: &Path) -> Result<Vec<PathBuf>> {
        fs::read_dir(path)?.map(|entry| Ok(entry?.path())).collect()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn create_file_impl(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>> {
        let file = fs::File::create(path).context("Failed to create file")?;
        Ok(Box::new(file))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn open_impl(&self, path: &Path) -> Result<Box<dyn std::io::Read + Send>> {
        let file = fs::File::open(path).context("Failed to open file")?;
        Ok(Box::new(file))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn set_permissions_impl(&self, path: &Path, mode: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(mode);
            fs::set_permissions(path, permissions).context("Failed to set permissions")?;
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn file_identity_impl(&self, path: &Path) -> Result<FileIdentity> {
        let metadata =
            fs::metadata(path).with_context(|| format!("Failed to read metadata of {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Ok(FileIdentity {
                device: metadata.dev(),
                file_id: metadata.ino(),
                link_count: metadata.nlink(),
                size: metadata.len(),
            })
        }
        #[cfg(not(unix))]
        {
            // No stable file ids: every file reports the same id, so nothing is relinked
            Ok(FileIdentity {
                device: 0,
                file_id: 0,
                link_count: 1,
                size: metadata.len(),
            })
        }
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn modified_impl(&self, path: &Path) -> Result<SystemTime> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time of {:?}", path))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn available_space_impl(&self, path: &Path) -> Result<u64> {
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .with_context(|| format!("No existing ancestor of {:?}", path))?;

        #[cfg(unix)]
        {
            let stats = nix::sys::statvfs::statvfs(existing)
                .with_context(|| format!("Failed to query free space of {:?}", existing))?;
            #[allow(clippy::unnecessary_cast)]
            Ok(stats.blocks_available() as u64 * stats.fragment_size() as u64)
        }
        #[cfg(not(unix))]
        {
            let _ = existing;
            Ok(u64::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::io::{Read, Write};
    use tempfile::tempdir;

    #[test]
    fn test_real_runtime_file_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        runtime.write(&file_path, b"hello").unwrap();
        assert!(runtime.exists(&file_path));

        runtime.append(&file_path, b" world").unwrap();
        assert_eq!(runtime.read_to_string(&file_path).unwrap(), "hello world");

        let new_path = dir.path().join("renamed.txt");
        runtime.rename(&file_path, &new_path).unwrap();
        assert!(!runtime.exists(&file_path));
        assert!(runtime.exists(&new_path));

        runtime.remove_file(&new_path).unwrap();
        assert!(!runtime.exists(&new_path));
    }

    #[test]
    fn test_append_creates_missing_file() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let journal = dir.path().join("journal.jsonl");

        runtime.append(&journal, b"{}\n").unwrap();
        runtime.append(&journal, b"{}\n").unwrap();
        assert_eq!(runtime.read_to_string(&journal).unwrap(), "{}\n{}\n");
    }

    #[test]
    fn test_real_runtime_dir_ops() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let sub_dir = dir.path().join("sub/nested");

        runtime.create_dir_all(&sub_dir).unwrap();
        assert!(runtime.is_dir(&sub_dir));

        let parent = dir.path().join("sub");
        let entries = runtime.read_dir(&parent).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with("nested"));

        runtime.remove_dir(&sub_dir).unwrap();
        assert!(!runtime.exists(&sub_dir));

        runtime.create_dir_all(&sub_dir).unwrap();
        runtime.remove_dir_all(&parent).unwrap();
        assert!(!runtime.exists(&parent));
    }

    #[test]
    fn test_real_runtime_create_file_and_open() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("stream.txt");

        {
            let mut writer = runtime.create_file(&file_path).unwrap();
            writer.write_all(b"streamed content").unwrap();
        }

        let mut reader = runtime.open(&file_path).unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "streamed content");
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_link_shares_identity() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let original = dir.path().join("a.bin");
        let link = dir.path().join("b.bin");
        runtime.write(&original, b"payload").unwrap();

        assert_eq!(runtime.file_identity(&original).unwrap().link_count, 1);
        runtime.hard_link(&original, &link).unwrap();

        let a = runtime.file_identity(&original).unwrap();
        let b = runtime.file_identity(&link).unwrap();
        assert!(a.same_file(&b));
        assert_eq!(a.link_count, 2);
        assert_eq!(b.size, 7);

        runtime.remove_file(&link).unwrap();
        assert_eq!(runtime.file_identity(&original).unwrap().link_count, 1);
    }

    #[test]
    fn test_available_space_of_missing_path() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let space = runtime
            .available_space(&dir.path().join("not/yet/created"))
            .unwrap();
        assert!(space > 0);
    }

    #[test]
    fn test_modified_time() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.txt");
        runtime.write(&path, b"x").unwrap();
        assert!(runtime.modified(&path).is_ok());
        assert!(runtime.modified(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_real_runtime_errors() {
        let runtime = RealRuntime;

        let result = runtime.read_to_string(std::path::Path::new("/nonexistent/path/file.txt"));
        assert!(result.is_err());

        let result = runtime.remove_file(std::path::Path::new("/nonexistent/path/file.txt"));
        assert!(result.is_err());
    }
}
