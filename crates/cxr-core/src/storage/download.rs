//! Streaming archive download with timeout and retry.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::StorageError;

/// Retry policy for failed downloads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { max_retries, initial_delay, max_delay, multiplier }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Exponential backoff: initial_delay * multiplier^retry_count, capped at max_delay.
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.multiplier.powi(retry_count as i32))
        .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Fetches archives over HTTP into local files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
    show_progress: bool,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), RetryPolicy::default())
    }
}

impl Downloader {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { client: reqwest::Client::new(), timeout, retry, show_progress: false }
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn shows_progress(&self) -> bool {
        self.show_progress
    }

    /// Downloads `url` to `dest` and returns the number of bytes written.
    ///
    /// On failure no file is left at `dest`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        let mut retry_count = 0;
        loop {
            let attempt = tokio::time::timeout(self.timeout, self.download_once(url, dest)).await;
            let err = match attempt {
                Ok(Ok(bytes)) => {
                    info!(url, path = %dest.display(), bytes, "archive downloaded");
                    return Ok(bytes);
                }
                Ok(Err(e)) => e,
                Err(_) => StorageError::Timeout { url: url.to_string(), secs: self.timeout.as_secs() },
            };

            remove_partial(dest).await;

            if retry_count >= self.retry.max_retries || !err.is_retryable() {
                return Err(err);
            }

            let delay = self.retry.calculate_delay(retry_count);
            retry_count += 1;
            warn!(
                url,
                error = %err,
                retry = retry_count,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                "download failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64, StorageError> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
        }

        let http_err = |source| StorageError::Http { url: url.to_string(), source };
        let response = self.client.get(url).send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let progress = self.progress_bar(response.content_length(), dest);
        let part = partial_path(dest);
        let written = stream_to_file(response, &part, &progress).await?;

        tokio::fs::rename(&part, dest).await.map_err(|e| StorageError::io(dest, e))?;
        progress.finish_and_clear();
        debug!(url, bytes = written, "download stream complete");
        Ok(written)
    }

    fn progress_bar(&self, len: Option<u64>, dest: &Path) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len.unwrap_or(0)).with_finish(ProgressFinish::AndClear);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        if let Some(name) = dest.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
        bar
    }
}

/// Streams the response body into `part`, advancing `progress` per chunk.
///
/// The bar is cleared when the stream or a write fails, so a retry starts a fresh one.
async fn stream_to_file(response: reqwest::Response, part: &Path, progress: &ProgressBar) -> Result<u64, StorageError> {
    let url = response.url().to_string();
    let result = async {
        let mut file = tokio::fs::File::create(part).await.map_err(|e| StorageError::io(part, e))?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| StorageError::Http { url: url.clone(), source })?;
            file.write_all(&chunk).await.map_err(|e| StorageError::io(part, e))?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }
        file.flush().await.map_err(|e| StorageError::io(part, e))?;
        Ok::<_, StorageError>(written)
    }
    .await;

    if result.is_err() {
        progress.finish_and_clear();
    }
    result
}

/// Sibling file a download streams into before it is renamed into place.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_partial(dest: &Path) {
    for path in [partial_path(dest), dest.to_path_buf()] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial download"),
        }
    }
}
