//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use serde_json::{Value, json};
use std::fs::{self, File};
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn write_entries<W: Write + Seek>(writer: W, files: &[(&str, &[u8])]) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in files {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    Ok(zip.finish()?)
}

pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_entries(File::create(path)?, files)?;
    Ok(())
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    Ok(write_entries(Cursor::new(Vec::new()), files)?.into_inner())
}

/// A data root with a config naming one instance per entry of `instances`.
pub struct Workspace {
    _dir: TempDir,
    pub data_root: PathBuf,
    pub games: Vec<PathBuf>,
}

impl Workspace {
    pub fn new(instances: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let data_root = dir.path().join("data");
        fs::create_dir_all(&data_root)?;

        let mut games = Vec::new();
        let mut configured = Vec::new();
        for name in instances {
            let game = dir.path().join(name);
            fs::create_dir_all(game.join("GameData"))?;
            configured.push(json!({ "name": name, "path": game }));
            games.push(game);
        }
        let config = json!({ "instances": configured, "default_instance": instances.first() });
        fs::write(data_root.join("config.json"), serde_json::to_vec_pretty(&config)?)?;

        Ok(Self {
            _dir: dir,
            data_root,
            games,
        })
    }

    pub fn game(&self) -> &Path {
        &self.games[0]
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_root.join("cache")
    }

    pub fn write_catalog(&self, packages: Value) -> Result<()> {
        fs::write(
            self.data_root.join("catalog.json"),
            serde_json::to_vec_pretty(&packages)?,
        )?;
        Ok(())
    }

    /// Puts an archive where the cache looks for `<id>-<version>.zip`.
    pub fn cache_archive(&self, identifier: &str, version: &str, files: &[(&str, &[u8])]) -> Result<()> {
        write_zip(
            &self.cache_dir().join(format!("{}-{}.zip", identifier, version)),
            files,
        )
    }
}
