//! State store for pin-relay
//!
//! Persists every discovered image in a single SQLite table and is the only
//! authority on whether an image has been downloaded or delivered before.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`]: connection lifecycle, versioned migrations, rebuild of incompatible files
//! - [`items`]: dedup inserts, status transitions, backlog queries

use crate::types::ItemStatus;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod items;
mod migrations;

/// Stored image record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Search term that produced the image
    pub query: String,
    /// File name derived from the URL (unique)
    pub filename: String,
    /// Source URL (unique)
    pub url: String,
    /// Delivery state
    pub status: ItemStatus,
    /// Unix timestamp of confirmed delivery
    pub sent_at: Option<i64>,
}

/// Item record as read from SQLite
#[derive(Debug, Clone, FromRow)]
struct ItemRow {
    query: String,
    filename: String,
    url: String,
    status: String,
    sent_at: Option<i64>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            query: row.query,
            filename: row.filename,
            url: row.url,
            status: ItemStatus::from_db(&row.status),
            sent_at: row.sent_at,
        }
    }
}

/// Per-status item counts for one query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Items waiting for delivery
    pub pending: u64,
    /// Items delivered
    pub sent: u64,
    /// Items whose staged bytes went missing
    pub error: u64,
}

impl StatusCounts {
    /// Items not yet delivered
    pub fn unsent(&self) -> u64 {
        self.pending + self.error
    }
}

/// Database handle for pin-relay
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}
