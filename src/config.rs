//! User configuration: the cache, download settings and known game instances.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::http::HttpClient;
use crate::instance::GameInstance;
use crate::package::ReleaseStatus;
use crate::paths::{config_path, default_cache_dir};
use crate::runtime::Runtime;
use crate::version::{GameVersion, GameVersionCriteria};

pub const USER_AGENT: &str = "modforge-cli";

const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults to `<data root>/cache`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Bytes; archives of installed packages are kept regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size_limit: Option<u64>,
    /// Destinations containing any of these substrings are skipped in every instance.
    pub global_install_filters: Vec<String>,
    pub download_concurrency: usize,
    pub instances: Vec<InstanceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_instance: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_size_limit: None,
            global_install_filters: Vec::new(),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            instances: Vec::new(),
            default_instance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub path: PathBuf,
    /// Game versions this instance accepts; empty means any.
    #[serde(default)]
    pub game_versions: Vec<GameVersion>,
    #[serde(default)]
    pub install_filters: Vec<String>,
    #[serde(default)]
    pub stability_tolerance: ReleaseStatus,
}

impl InstanceConfig {
    pub fn to_instance(&self) -> GameInstance {
        let criteria = if self.game_versions.is_empty() {
            GameVersionCriteria::any()
        } else {
            GameVersionCriteria::new(self.game_versions.clone())
        };
        let mut instance = GameInstance::new(&self.name, &self.path)
            .with_criteria(criteria)
            .with_install_filters(self.install_filters.clone());
        instance.stability_tolerance = self.stability_tolerance;
        instance
    }
}

impl Config {
    /// Reads `<root>/config.json`, or the defaults if there is none.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, root: &Path) -> Result<Self> {
        let path = config_path(root);
        if !runtime.exists(&path) {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = runtime.read_to_string(&path)?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse config at {:?}", path))
    }

    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, root: &Path) -> Result<()> {
        runtime.create_dir_all(root)?;
        let json = serde_json::to_string_pretty(self)?;
        runtime.write(&config_path(root), json.as_bytes())
    }

    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| default_cache_dir(root))
    }

    pub fn game_instances(&self) -> Vec<GameInstance> {
        self.instances.iter().map(InstanceConfig::to_instance).collect()
    }

    /// Picks the named instance, else the configured default, else the only one.
    pub fn select_instance(&self, name: Option<&str>) -> Result<GameInstance> {
        let wanted = name.or(self.default_instance.as_deref());
        let found = match wanted {
            Some(wanted) => self
                .instances
                .iter()
                .find(|i| i.name == wanted)
                .ok_or_else(|| anyhow!("No game instance named '{}'", wanted))?,
            None => match self.instances.as_slice() {
                [only] => only,
                [] => bail!("No game instances configured"),
                _ => bail!("Several game instances configured; pick one with --instance"),
            },
        };
        Ok(found.to_instance())
    }

    pub fn http_client(&self) -> Result<HttpClient> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpClient::new(client))
    }
}
