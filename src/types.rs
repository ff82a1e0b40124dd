//! Core types for pin-relay

use serde::{Deserialize, Serialize};

/// Delivery state of a stored item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Downloaded (or recorded) but not yet confirmed delivered
    #[default]
    Pending,
    /// Delivered in a confirmed album; terminal
    Sent,
    /// Staged bytes were missing when the item was due for delivery
    Error,
}

impl ItemStatus {
    /// Text stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Sent => "sent",
            ItemStatus::Error => "error",
        }
    }

    /// Parse the `status` column; unknown values are treated as pending so they get retried
    pub fn from_db(value: &str) -> Self {
        match value {
            "sent" => ItemStatus::Sent,
            "error" => ItemStatus::Error,
            _ => ItemStatus::Pending,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(filename, url)` pair identifying one image
///
/// Returned by the downloader for freshly staged items and by
/// [`Database::list_unsent`](crate::db::Database::list_unsent) for the backlog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    /// File name inside the staging directory (also the store key)
    pub filename: String,
    /// Source URL the bytes come from
    pub url: String,
}

impl ItemRef {
    /// Create a new pair
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// New items staged in this run
    pub downloaded: usize,
    /// Items left unsent by earlier runs that were queued again
    pub recovered: usize,
    /// Items in albums the channel confirmed
    pub sent: usize,
    /// Albums that failed after all attempts
    pub failed_batches: usize,
    /// The search produced no candidate URLs
    pub no_results: bool,
}

impl RunReport {
    /// Report for a search that produced nothing
    pub fn no_results() -> Self {
        Self {
            no_results: true,
            ..Default::default()
        }
    }
}

/// Event emitted during a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started for a query
    SearchStarted {
        /// The search query
        query: String,
    },

    /// The search returned no usable URLs
    NoResults {
        /// The search query
        query: String,
    },

    /// An image was written to the staging directory
    ItemStaged {
        /// Staged file name
        filename: String,
    },

    /// An album was confirmed by the channel
    BatchDelivered {
        /// Items in the album
        count: usize,
        /// Attempts it took
        attempts: u32,
    },

    /// An album could not be delivered
    BatchFailed {
        /// Items in the album
        count: usize,
        /// Final error
        error: String,
    },

    /// A run finished
    RunComplete {
        /// The search query
        query: String,
        /// Aggregate counts
        report: RunReport,
    },
}
