//! Album building, sending and cleanup

use super::{DeliveryChannel, MediaItem};
use crate::config::{CaptionPlacement, DeliveryConfig, RetryConfig};
use crate::db::Database;
use crate::retry::retry_with_backoff;
use crate::types::{Event, ItemRef};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;

/// Counts from one [`BatchDeliverer::deliver`] call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Items in albums the channel confirmed
    pub sent: usize,
    /// Albums that failed after all attempts
    pub failed_batches: usize,
    /// Items whose staged file was gone when their album was built
    pub missing: usize,
}

/// Sends staged items as albums and releases their staged files
pub struct BatchDeliverer {
    channel: Arc<dyn DeliveryChannel>,
    db: Arc<Database>,
    settings: DeliveryConfig,
    retry: RetryConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl BatchDeliverer {
    /// Create a deliverer for `settings.chat_target`
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        db: Arc<Database>,
        settings: DeliveryConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            channel,
            db,
            settings,
            retry,
            event_tx: None,
        }
    }

    /// Emit [`Event::BatchDelivered`] and [`Event::BatchFailed`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Deliver `items`, staged under `staging_dir`, in albums of `images_per_album`
    ///
    /// Albums are sent strictly one after another. Items of a confirmed album
    /// are marked sent; items of a failed album stay pending. The staged files
    /// of every album are deleted once the album is done with, whatever the
    /// outcome.
    pub async fn deliver(&self, items: &[ItemRef], staging_dir: &Path) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let album_size = self.settings.images_per_album.max(1);

        for batch in items.chunks(album_size) {
            let album = self.build_album(batch, staging_dir, &mut report).await;

            if !album.is_empty() {
                self.send(&album, &mut report).await;
            }

            remove_staged(batch, staging_dir).await;
        }

        report
    }

    /// Read the staged bytes of `batch`; items whose file is gone are marked as errors
    async fn build_album(
        &self,
        batch: &[ItemRef],
        staging_dir: &Path,
        report: &mut DeliveryReport,
    ) -> Vec<MediaItem> {
        let mut album = Vec::with_capacity(batch.len());

        for item in batch {
            let path = staging_dir.join(&item.filename);
            match tokio::fs::read(&path).await {
                Ok(bytes) => album.push(MediaItem {
                    filename: item.filename.clone(),
                    bytes,
                    caption: None,
                }),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Staged file unavailable, excluding from album"
                    );
                    report.missing += 1;
                    if let Err(e) = self.db.mark_error(&item.filename).await {
                        tracing::error!(
                            filename = %item.filename,
                            error = %e,
                            "Failed to mark item as error"
                        );
                    }
                }
            }
        }

        if let Some(caption) = &self.settings.caption {
            let carrier = match self.settings.caption_placement {
                CaptionPlacement::First => album.first_mut(),
                CaptionPlacement::Last => album.last_mut(),
            };
            if let Some(carrier) = carrier {
                carrier.caption = Some(caption.clone());
            }
        }

        album
    }

    async fn send(&self, album: &[MediaItem], report: &mut DeliveryReport) {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let channel = &self.channel;
        let target = self.settings.chat_target.as_str();

        let result = retry_with_backoff(&self.retry, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            channel.send_album(target, album)
        })
        .await;
        let attempts = attempts.load(Ordering::Relaxed);

        match result {
            Ok(()) => {
                for item in album {
                    if let Err(e) = self.db.mark_sent(&item.filename).await {
                        tracing::error!(
                            filename = %item.filename,
                            error = %e,
                            "Failed to mark item as sent"
                        );
                    }
                }
                report.sent += album.len();

                tracing::info!(count = album.len(), attempts, "Album delivered");
                self.emit(Event::BatchDelivered {
                    count: album.len(),
                    attempts,
                });

                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
            Err(e) => {
                report.failed_batches += 1;

                tracing::warn!(count = album.len(), attempts, error = %e, "Album delivery failed");
                self.emit(Event::BatchFailed {
                    count: album.len(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // no subscribers is fine
            tx.send(event).ok();
        }
    }
}

async fn remove_staged(batch: &[ItemRef], staging_dir: &Path) {
    for item in batch {
        let path = staging_dir.join(&item.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete staged file");
            }
        }
    }
}
