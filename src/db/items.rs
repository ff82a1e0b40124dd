//! Item dedup, status transitions, and backlog queries.

use crate::error::DatabaseError;
use crate::types::{ItemRef, ItemStatus};
use crate::{Error, Result};

use super::{Database, Item, ItemRow, StatusCounts};

impl Database {
    /// Record a newly discovered image as pending
    ///
    /// Returns `true` if the row was inserted, `false` if an item with the same
    /// filename or url already exists. The check and the insert are a single
    /// statement, so two callers racing on the same identity end up with one row.
    pub async fn record_new(&self, query: &str, filename: &str, url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO images (query, filename, url, status)
            VALUES (?, ?, ?, 'pending')
            "#,
        )
        .bind(query)
        .bind(filename)
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert image {}: {}",
                filename, e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark an item as delivered
    ///
    /// Idempotent: unknown filenames and already-sent items are left untouched.
    pub async fn mark_sent(&self, filename: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images SET status = 'sent', sent_at = ?
            WHERE filename = ? AND status IS NOT 'sent'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(filename)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark {} as sent: {}",
                filename, e
            )))
        })?;

        Ok(())
    }

    /// Mark an item whose staged bytes went missing
    ///
    /// Sent items never leave the sent state, so this is a no-op for them.
    pub async fn mark_error(&self, filename: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE images SET status = 'error'
            WHERE filename = ? AND status IS NOT 'sent'
            "#,
        )
        .bind(filename)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark {} as error: {}",
                filename, e
            )))
        })?;

        Ok(())
    }

    /// Items of `query` that have not been delivered yet, oldest first
    pub async fn list_unsent(&self, query: &str, limit: usize) -> Result<Vec<ItemRef>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT filename, url FROM images
            WHERE query = ? AND status IS NOT 'sent'
            ORDER BY rowid
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list unsent images: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|(filename, url)| ItemRef { filename, url })
            .collect())
    }

    /// Items of `query` still waiting for delivery, oldest first
    ///
    /// Unlike [`list_unsent`](Self::list_unsent) this leaves out `error` rows,
    /// whose bytes could not be staged.
    pub async fn list_pending(&self, query: &str, limit: usize) -> Result<Vec<ItemRef>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT filename, url FROM images
            WHERE query = ? AND COALESCE(status, 'pending') = 'pending'
            ORDER BY rowid
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list pending images: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|(filename, url)| ItemRef { filename, url })
            .collect())
    }

    /// Look up one item by filename
    pub async fn get_item(&self, filename: &str) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT
                COALESCE(query, '') AS query,
                filename,
                url,
                COALESCE(status, 'pending') AS status,
                sent_at
            FROM images
            WHERE filename = ?
            "#,
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get image {}: {}",
                filename, e
            )))
        })?;

        Ok(row.map(Item::from))
    }

    /// Count items of `query` by status
    pub async fn count_by_status(&self, query: &str) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT COALESCE(status, 'pending'), COUNT(*) FROM images
            WHERE query = ?
            GROUP BY COALESCE(status, 'pending')
            "#,
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count images: {}",
                e
            )))
        })?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match ItemStatus::from_db(&status) {
                ItemStatus::Pending => counts.pending += count,
                ItemStatus::Sent => counts.sent += count,
                ItemStatus::Error => counts.error += count,
            }
        }

        Ok(counts)
    }
}
