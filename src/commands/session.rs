//! Everything a command needs: the data root, config, selected instance and
//! the collaborators built from them.

use anyhow::Result;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::cache::DirectoryCache;
use crate::config::Config;
use crate::dedup::{Deduplicator, InstanceFiles};
use crate::download::HttpDownloader;
use crate::index::{Registry, RegistryStore};
use crate::installer::{ChangeReport, Installer, scan_manual_binaries};
use crate::instance::GameInstance;
use crate::paths::{catalog_path, data_root};
use crate::runtime::{RealRuntime, Runtime};
use crate::transaction::Transaction;
use crate::user::{ConsoleUser, HeadlessUser, User};

/// Global command line switches.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub root: Option<PathBuf>,
    pub instance: Option<String>,
    pub assume_yes: bool,
    pub headless: bool,
}

pub struct Session {
    pub runtime: Arc<RealRuntime>,
    pub data_root: PathBuf,
    pub config: Config,
    pub instance: GameInstance,
    pub user: Box<dyn User>,
    pub cancel: CancellationToken,
    handle: Handle,
}

impl Session {
    #[tracing::instrument(skip(options, cancel, handle))]
    pub fn open(options: &SessionOptions, cancel: CancellationToken, handle: Handle) -> Result<Self> {
        let runtime = Arc::new(RealRuntime);
        let data_root = data_root(&*runtime, options.root.clone())?;
        let config = Config::load(&*runtime, &data_root)?;
        let instance = config.select_instance(options.instance.as_deref())?;
        info!("Using instance '{}' at {}", instance.name, instance.root.display());

        let user: Box<dyn User> = if options.headless {
            Box::new(HeadlessUser {
                assume_yes: options.assume_yes,
            })
        } else {
            Box::new(ConsoleUser {
                assume_yes: options.assume_yes,
            })
        };

        Ok(Self {
            runtime,
            data_root,
            config,
            instance,
            user,
            cancel,
            handle,
        })
    }

    /// Rolls back whatever an interrupted operation left behind.
    pub fn recover_interrupted(&self) -> Result<bool> {
        let recovered = Transaction::recover(&*self.runtime, &self.instance.root)?;
        if recovered {
            self.user
                .warning("An interrupted operation was found and rolled back");
        }
        Ok(recovered)
    }

    /// The instance registry with the catalog attached and manually
    /// installed binaries rescanned.
    pub fn load_registry(&self) -> Result<Registry> {
        self.recover_interrupted()?;
        let store = RegistryStore::new(&*self.runtime, self.instance.root.clone());
        let mut registry = store.load_with_catalog(&catalog_path(&self.data_root))?;
        let found = scan_manual_binaries(&*self.runtime, &self.instance, &mut registry)?;
        debug!("Found {} manually installed binaries", found);
        Ok(registry)
    }

    pub fn cache(&self) -> DirectoryCache<RealRuntime> {
        DirectoryCache::new(RealRuntime, self.config.cache_dir(&self.data_root))
    }

    pub fn downloader(&self) -> Result<HttpDownloader<RealRuntime>> {
        Ok(HttpDownloader::new(
            self.runtime.clone(),
            self.config.http_client()?,
            self.config.download_concurrency,
            self.handle.clone(),
        )
        .with_cancel(self.cancel.clone()))
    }

    /// Installed files of every configured instance whose root exists.
    pub fn instance_files(&self) -> Result<Vec<InstanceFiles>> {
        let mut files = Vec::new();
        for instance in self.config.game_instances() {
            if !self.runtime.exists(&instance.root) {
                warn!("Skipping instance '{}': {} is missing", instance.name, instance.root.display());
                continue;
            }
            let registry = RegistryStore::new(&*self.runtime, instance.root.clone()).load()?;
            files.push(InstanceFiles::new(instance.name, instance.root, &registry));
        }
        Ok(files)
    }

    /// Builds an installer for the selected instance and hands it to `change`.
    pub fn run_change<F>(&self, registry: &mut Registry, change: F) -> Result<ChangeReport>
    where
        F: FnOnce(&Installer<'_, RealRuntime>, &mut Registry) -> Result<ChangeReport>,
    {
        let cache = self.cache();
        let downloader = self.downloader()?;
        let dedup = Deduplicator::new(&*self.runtime, self.instance_files()?);
        let installer = Installer::new(
            &*self.runtime,
            &self.instance,
            &cache,
            &downloader,
            self.user.as_ref(),
        )
        .with_cancel(self.cancel.clone())
        .with_global_filters(self.config.global_install_filters.clone())
        .with_cache_size_limit(self.config.cache_size_limit)
        .with_deduplicator(&dedup);

        let report = change(&installer, registry)?;
        for dir in &report.possible_config_only {
            self.user.warning(&format!(
                "{} only holds files modforge did not install; delete it by hand if it is unused",
                dir
            ));
        }
        Ok(report)
    }
}
