//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use reqwest::Client;
use std::io::Write;
use std::time::Duration;

use super::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable};

/// HTTP client with built-in retry logic for archive downloads.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Overrides the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Downloads `url` into a fresh writer from `create_writer`, reporting
    /// each chunk's length to `on_chunk`. Retries transient failures.
    #[tracing::instrument(skip(self, create_writer, on_chunk))]
    pub async fn download_file<W, F, P>(&self, url: &str, create_writer: F, on_chunk: P) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: Fn(u64),
    {
        debug!("Downloading file from {}...", url);
        self.with_retry("Download", || self.download_file_once(url, &create_writer, &on_chunk))
            .await
    }

    /// Tries each mirror in turn until one succeeds.
    pub async fn download_from_mirrors<W, F, P>(&self, urls: &[String], create_writer: F, on_chunk: P) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: Fn(u64),
    {
        let mut last_error = None;
        for url in urls {
            match self.download_file(url, &create_writer, &on_chunk).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("Download from {} failed: {:#}", url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("No download URL")))
    }

    /// Single download attempt without retry.
    async fn download_file_once<W, F, P>(&self, url: &str, create_writer: &F, on_chunk: &P) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: Fn(u64),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }
        writer.flush().context("Failed to flush download")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }

    /// Executes an async operation with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.downcast_ref::<NonRetryableError>().is_some() {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }

                    if attempt < MAX_RETRIES {
                        warn!(
                            "{}: attempt {}/{} failed ({}), retrying in {:?}...",
                            operation_name, attempt, MAX_RETRIES, e, self.retry_delay
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("{}: failed after {} attempts", operation_name, MAX_RETRIES)))
    }
}
