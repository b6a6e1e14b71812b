//! Fetching package archives in the background.
//!
//! Downloads run on the tokio runtime and report back over a
//! `std::sync::mpsc` channel, so the installer can keep extracting cached
//! packages on its own thread while archives arrive.

use crate::error::ModError;
use crate::http::HttpClient;
use crate::package::Package;
use crate::runtime::Runtime;
use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// One archive to fetch and the file to write it to.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub package: Package,
    pub target: PathBuf,
}

#[derive(Debug)]
pub enum DownloadEvent {
    /// Bytes still expected across the whole batch.
    Progress { bytes_left: u64 },
    /// `path` holds the complete archive; it still has to be stored in the cache.
    Completed { package: Package, path: PathBuf },
    Failed { package: Package, error: anyhow::Error },
}

#[cfg_attr(test, mockall::automock)]
pub trait Downloader: Send + Sync {
    /// Starts fetching every request. The receiver yields one `Completed` or
    /// `Failed` per request and closes when all are done.
    fn start(&self, requests: Vec<DownloadRequest>) -> Receiver<DownloadEvent>;
}

/// Downloads over HTTP with bounded concurrency.
pub struct HttpDownloader<R: Runtime + 'static> {
    runtime: Arc<R>,
    client: HttpClient,
    concurrency: usize,
    handle: Handle,
    cancel: CancellationToken,
}

impl<R: Runtime + 'static> HttpDownloader<R> {
    pub fn new(runtime: Arc<R>, client: HttpClient, concurrency: usize, handle: Handle) -> Self {
        Self {
            runtime,
            client,
            concurrency: concurrency.max(1),
            handle,
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts in-flight downloads when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<R: Runtime + 'static> Downloader for HttpDownloader<R> {
    fn start(&self, requests: Vec<DownloadRequest>) -> Receiver<DownloadEvent> {
        let (tx, rx) = mpsc::channel();
        let total: u64 = requests
            .iter()
            .map(|r| r.package.download_size.unwrap_or(0))
            .sum();
        let left = Arc::new(AtomicU64::new(total));

        let runtime = self.runtime.clone();
        let client = self.client.clone();
        let cancel = self.cancel.clone();
        let concurrency = self.concurrency;

        self.handle.spawn(async move {
            stream::iter(requests)
                .map(|request| {
                    let runtime = runtime.clone();
                    let client = client.clone();
                    let cancel = cancel.clone();
                    let left = left.clone();
                    let tx = tx.clone();
                    async move {
                        let result = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                Err(ModError::cancelled("download interrupted").into())
                            }
                            result = fetch(&*runtime, &client, &request, &left, &tx) => result,
                        };
                        (request, result)
                    }
                })
                .buffer_unordered(concurrency)
                .for_each(|(request, result)| {
                    let event = match result {
                        Ok(()) => DownloadEvent::Completed {
                            package: request.package,
                            path: request.target,
                        },
                        Err(error) => DownloadEvent::Failed {
                            package: request.package,
                            error,
                        },
                    };
                    // The installer may have stopped listening after a failure
                    let _ = tx.send(event);
                    async {}
                })
                .await;
        });

        rx
    }
}

#[tracing::instrument(skip_all, fields(package = %request.package))]
async fn fetch<R: Runtime + ?Sized>(
    runtime: &R,
    client: &HttpClient,
    request: &DownloadRequest,
    left: &AtomicU64,
    tx: &Sender<DownloadEvent>,
) -> Result<()> {
    let package = &request.package;
    if package.download.is_empty() {
        return Err(anyhow!("{} has no download URL", package));
    }
    if let Some(parent) = request.target.parent() {
        runtime
            .create_dir_all(parent)
            .with_context(|| format!("Failed to create download directory {:?}", parent))?;
    }

    info!("Downloading {}...", package);
    let bytes = client
        .download_from_mirrors(
            &package.download,
            || {
                runtime
                    .create_file(&request.target)
                    .with_context(|| format!("Failed to create download file at {:?}", request.target))
            },
            |n| {
                let previous = left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(n)))
                    .unwrap_or(0);
                let _ = tx.send(DownloadEvent::Progress {
                    bytes_left: previous.saturating_sub(n),
                });
            },
        )
        .await?;
    debug!("Downloaded {} bytes for {}", bytes, package);
    Ok(())
}
