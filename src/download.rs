//! Image downloading into the staging directory
//!
//! Every candidate is checked against the state store before any network
//! I/O: an image whose filename or url is already known is skipped outright.
//! New images are recorded as pending first and then streamed to
//! `output_dir/filename`. A failed download leaves no partial file behind and
//! does not stop the batch.

use crate::config::DownloadConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::ItemRef;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Derive the staging filename from the last non-empty path segment of `url`
///
/// Query strings and fragments are ignored and percent-escapes decoded.
/// Returns `None` when there is no usable segment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let segment = match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.rev().find(|s| !s.is_empty()))
            .map(str::to_string),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').find(|s| !s.is_empty()))
            .map(str::to_string),
    }?;

    let decoded = match urlencoding::decode(&segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment,
    };
    let name = decoded.replace(['/', '\\'], "_");

    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

/// Downloads candidate images and records them in the state store
pub struct Downloader {
    client: reqwest::Client,
    db: Arc<Database>,
}

impl Downloader {
    /// Build a downloader with its own HTTP client
    pub fn new(settings: &DownloadConfig, db: Arc<Database>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self::with_client(client, db))
    }

    /// Use an existing HTTP client
    pub fn with_client(client: reqwest::Client, db: Arc<Database>) -> Self {
        Self { client, db }
    }

    /// Stage up to `max_total` images that have never been seen before
    ///
    /// Candidates are processed in order. Already-known images do not count
    /// toward `max_total` and are never fetched. Returns the staged items in
    /// processing order; this is the delivery queue for the run.
    ///
    /// # Errors
    ///
    /// Fails if the staging directory cannot be created or the state store
    /// stops answering. Individual download failures are logged and skipped.
    pub async fn download(
        &self,
        candidates: &[String],
        query: &str,
        output_dir: &Path,
        max_total: usize,
    ) -> Result<Vec<ItemRef>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut staged = Vec::new();
        for url in candidates {
            if staged.len() >= max_total {
                break;
            }

            let Some(filename) = filename_from_url(url) else {
                tracing::warn!(url = %url, "Cannot derive filename from URL, skipping");
                continue;
            };

            if !self.db.record_new(query, &filename, url).await? {
                tracing::debug!(filename = %filename, "Image already known, skipping");
                continue;
            }

            let target = output_dir.join(&filename);
            match self.fetch_to_file(url, &target).await {
                Ok(bytes) => {
                    tracing::debug!(filename = %filename, bytes, "Image staged");
                    staged.push(ItemRef::new(filename, url.as_str()));
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Image download failed");
                    remove_partial(&target).await;
                }
            }
        }

        tracing::info!(
            query = %query,
            staged = staged.len(),
            candidates = candidates.len(),
            "Download pass finished"
        );

        Ok(staged)
    }

    /// Make sure already-recorded items have their bytes staged
    ///
    /// Items whose file is still present are kept as they are; missing files
    /// are downloaded again. An item that cannot be fetched is marked `error`
    /// so it stops being offered for recovery. Returns the items that are
    /// staged afterwards.
    pub async fn restage(&self, items: &[ItemRef], output_dir: &Path) -> Result<Vec<ItemRef>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut staged = Vec::with_capacity(items.len());
        for item in items {
            let target = output_dir.join(&item.filename);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                staged.push(item.clone());
                continue;
            }

            match self.fetch_to_file(&item.url, &target).await {
                Ok(_) => {
                    tracing::debug!(filename = %item.filename, "Image restaged");
                    staged.push(item.clone());
                }
                Err(e) => {
                    tracing::warn!(url = %item.url, error = %e, "Image restage failed");
                    remove_partial(&target).await;
                    self.db.mark_error(&item.filename).await?;
                }
            }
        }

        Ok(staged)
    }

    /// Stream `url` into `target`, returning the number of bytes written
    async fn fetch_to_file(&self, url: &str, target: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}
