//! One query, end to end: search, download, deliver
//!
//! [`Pipeline::run`] never fails. Network errors, missing files and channel
//! timeouts are absorbed along the way and show up only in the returned
//! [`RunReport`] and in the log.

use crate::config::Config;
use crate::db::Database;
use crate::delivery::{BatchDeliverer, DeliveryChannel};
use crate::download::Downloader;
use crate::error::Result;
use crate::search::{Fetcher, SearchConfig};
use crate::types::{Event, ItemRef, RunReport};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Search-to-delivery orchestrator
///
/// Holds the state store open for its whole lifetime. Runs are expected to be
/// issued one at a time.
pub struct Pipeline {
    config: Arc<Config>,
    db: Arc<Database>,
    fetcher: Fetcher,
    downloader: Downloader,
    deliverer: BatchDeliverer,
    event_tx: broadcast::Sender<Event>,
}

impl Pipeline {
    /// Validate `config`, open the state store and wire up the stages
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when the state store cannot be opened
    /// or migrated, or when an HTTP client cannot be built.
    pub async fn new(config: Config, channel: Arc<dyn DeliveryChannel>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let fetcher = Fetcher::new(&config.search)?;
        let downloader = Downloader::new(&config.download, db.clone())?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let deliverer = BatchDeliverer::new(
            channel,
            db.clone(),
            config.delivery.clone(),
            config.retry.clone(),
        )
        .with_events(event_tx.clone());

        tracing::info!(
            database = %config.persistence.database_path.display(),
            chat_target = %config.delivery.chat_target,
            "Pipeline ready"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            fetcher,
            downloader,
            deliverer,
            event_tx,
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The state store this pipeline writes to
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Search for `query`, stage new images under `output_dir` and deliver them
    pub async fn run(&self, query: &str, output_dir: &Path) -> RunReport {
        tracing::info!(query = %query, output_dir = %output_dir.display(), "Run started");
        self.emit(Event::SearchStarted {
            query: query.to_string(),
        });

        let report = match self.try_run(query, output_dir).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(query = %query, error = %e, "Run aborted");
                RunReport::default()
            }
        };

        tracing::info!(
            query = %query,
            downloaded = report.downloaded,
            recovered = report.recovered,
            sent = report.sent,
            failed_batches = report.failed_batches,
            "Run finished"
        );
        self.emit(Event::RunComplete {
            query: query.to_string(),
            report,
        });

        report
    }

    async fn try_run(&self, query: &str, output_dir: &Path) -> Result<RunReport> {
        let search = SearchConfig::new(query, &self.config.search);
        let urls = match self.fetcher.fetch(&search).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Search failed");
                Vec::new()
            }
        };

        if urls.is_empty() {
            tracing::info!(query = %query, "No images found");
            self.emit(Event::NoResults {
                query: query.to_string(),
            });
            return Ok(RunReport::no_results());
        }

        // read before downloading so the window only holds earlier runs' leftovers
        let backlog = if self.config.delivery.recover_backlog {
            self.db
                .list_pending(query, self.config.delivery.images_per_album)
                .await?
        } else {
            Vec::new()
        };

        let staged = self
            .downloader
            .download(&urls, query, output_dir, self.config.download.max_per_run)
            .await?;
        for item in &staged {
            self.emit(Event::ItemStaged {
                filename: item.filename.clone(),
            });
        }

        let mut queue = staged.clone();
        let recovered = if backlog.is_empty() {
            0
        } else {
            let fresh: HashSet<&str> = staged.iter().map(|i| i.filename.as_str()).collect();
            let leftovers: Vec<ItemRef> = backlog
                .into_iter()
                .filter(|i| !fresh.contains(i.filename.as_str()))
                .collect();
            let restaged = self.downloader.restage(&leftovers, output_dir).await?;
            tracing::info!(
                query = %query,
                backlog = leftovers.len(),
                restaged = restaged.len(),
                "Recovered unsent items"
            );
            let count = restaged.len();
            queue.extend(restaged);
            count
        };

        let delivery = self.deliverer.deliver(&queue, output_dir).await;

        Ok(RunReport {
            downloaded: staged.len(),
            recovered,
            sent: delivery.sent,
            failed_batches: delivery.failed_batches,
            no_results: false,
        })
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
