//! Database lifecycle, versioned schema migrations, and rebuild of incompatible files.

use crate::download::filename_from_url;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{Connection, SqliteConnection};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::Database;

/// Columns that make up an item's identity; a table without them cannot be migrated in place
const IDENTITY_COLUMNS: [&str; 3] = ["query", "filename", "url"];

/// Ordered schema migrations
///
/// Files written by older releases never recorded a schema version, so every
/// step checks whether it still has work to do before touching the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Migration {
    CreateImages = 1,
    AddStatus = 2,
    AddSentAt = 3,
    IndexQueryStatus = 4,
}

const MIGRATIONS: [Migration; 4] = [
    Migration::CreateImages,
    Migration::AddStatus,
    Migration::AddSentAt,
    Migration::IndexQueryStatus,
];

impl Migration {
    fn version(self) -> i64 {
        self as i64
    }

    fn description(self) -> &'static str {
        match self {
            Migration::CreateImages => "create images table",
            Migration::AddStatus => "add status column",
            Migration::AddSentAt => "add sent_at column",
            Migration::IndexQueryStatus => "index images by query and status",
        }
    }
}

impl Database {
    /// Open (or create) the state store at `path`
    ///
    /// Creates the parent directory and the file if needed, then brings the
    /// schema up to date. A file whose `images` table cannot be migrated in
    /// place is moved aside to `<path>.backup` and rebuilt, keeping whatever
    /// rows can be read back from the backup.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let db = Self {
            pool: Self::connect(path).await?,
            path: path.to_path_buf(),
        };

        let db = match db.schema_incompatibility().await? {
            Some(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "Existing images table is incompatible, rebuilding state store"
                );
                db.rebuild().await?
            }
            None => db,
        };

        db.run_migrations().await?;

        Ok(db)
    }

    async fn connect(path: &Path) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })
    }

    /// Explain why the existing `images` table cannot be migrated in place, if it cannot
    async fn schema_incompatibility(&self) -> Result<Option<String>> {
        let mut conn = self.acquire().await?;

        let columns = table_columns(&mut conn).await?;
        if columns.is_empty() {
            // No table yet, migration v1 creates it
            return Ok(None);
        }

        let missing: Vec<&str> = IDENTITY_COLUMNS
            .iter()
            .copied()
            .filter(|wanted| !columns.iter().any(|have| have == wanted))
            .collect();
        if !missing.is_empty() {
            return Ok(Some(format!("images table lacks {}", missing.join(", "))));
        }

        for column in ["filename", "url"] {
            if !has_unique_index(&mut conn, column).await? {
                return Ok(Some(format!("images.{} is not unique", column)));
            }
        }

        Ok(None)
    }

    /// Move the current file aside, start a fresh schema, and reimport what we can
    async fn rebuild(self) -> Result<Self> {
        let Database { pool, path } = self;
        pool.close().await;

        let backup = backup_path(&path).await;
        tokio::fs::rename(&path, &backup).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to back up {} to {}: {}",
                path.display(),
                backup.display(),
                e
            )))
        })?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = with_suffix(&path, suffix);
            if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::rename(&sidecar, with_suffix(&backup, suffix)).await {
                    tracing::warn!(
                        path = %sidecar.display(),
                        error = %e,
                        "Failed to move journal file aside"
                    );
                }
            }
        }

        let db = Self {
            pool: Self::connect(&path).await?,
            path,
        };
        db.run_migrations().await?;

        match db.reimport_from(&backup).await {
            Ok(restored) => {
                tracing::info!(
                    backup = %backup.display(),
                    restored,
                    "State store rebuilt from backup"
                );
            }
            Err(e) => {
                tracing::warn!(
                    backup = %backup.display(),
                    error = %e,
                    "Could not reimport rows from backup, continuing with an empty store"
                );
            }
        }

        Ok(db)
    }

    /// Copy identity columns out of an old file
    ///
    /// Rows whose filename or url is already known are skipped. A missing
    /// filename is derived from the url again; rows without a url are dropped.
    async fn reimport_from(&self, backup: &Path) -> Result<usize> {
        let options = SqliteConnectOptions::new().filename(backup);
        let mut old = SqliteConnection::connect_with(&options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to open backup database: {}",
                e
            )))
        })?;

        let columns = table_columns(&mut old).await?;
        if !columns.iter().any(|c| c == "url") {
            let _ = old.close().await;
            return Ok(0);
        }
        let pick = |name: &str| {
            if columns.iter().any(|c| c == name) {
                format!("CAST({} AS TEXT)", name)
            } else {
                "NULL".to_string()
            }
        };
        let sql = format!(
            "SELECT {}, {}, {} FROM images",
            pick("query"),
            pick("filename"),
            pick("url")
        );

        let rows: Vec<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(&sql)
            .fetch_all(&mut old)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read rows from backup: {}",
                    e
                )))
            })?;
        let _ = old.close().await;

        let mut restored = 0;
        for (query, filename, url) in rows {
            let Some(url) = url else { continue };
            let Some(filename) = filename.or_else(|| filename_from_url(&url)) else {
                continue;
            };
            if self
                .record_new(query.as_deref().unwrap_or_default(), &filename, &url)
                .await?
            {
                restored += 1;
            }
        }

        Ok(restored)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;
        let current_version = current_version.unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version() > current_version {
                Self::apply_migration(&mut conn, migration).await?;
            }
        }

        Ok(())
    }

    /// Apply one migration inside a transaction
    async fn apply_migration(conn: &mut SqliteConnection, migration: Migration) -> Result<()> {
        tracing::info!(
            version = migration.version(),
            "Applying database migration: {}",
            migration.description()
        );

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            match migration {
                Migration::CreateImages => Self::create_images_table(conn).await?,
                Migration::AddStatus => {
                    Self::add_column_if_missing(conn, "status", "TEXT NOT NULL DEFAULT 'pending'")
                        .await?
                }
                Migration::AddSentAt => {
                    Self::add_column_if_missing(conn, "sent_at", "INTEGER").await?
                }
                Migration::IndexQueryStatus => {
                    sqlx::query(
                        "CREATE INDEX IF NOT EXISTS idx_images_query_status ON images(query, status)",
                    )
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to create index: {}",
                            e
                        )))
                    })?;
                }
            }
            Self::record_migration(conn, migration.version()).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            migration.version(),
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version = migration.version(), "Database migration complete");
        Ok(())
    }

    async fn create_images_table(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                filename TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create images table: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn add_column_if_missing(
        conn: &mut SqliteConnection,
        column: &str,
        declaration: &str,
    ) -> Result<()> {
        let present: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('images') WHERE name = ?")
                .bind(column)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to inspect images table: {}",
                        e
                    )))
                })?;

        if present > 0 {
            tracing::debug!(column, "Column already present, skipping");
            return Ok(());
        }

        let sql = format!("ALTER TABLE images ADD COLUMN {} {}", column, declaration);
        sqlx::query(&sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to add {} column: {}",
                column, e
            )))
        })?;

        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;

        Ok(())
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn table_columns(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info('images')")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to inspect images table: {}",
                e
            )))
        })
}

async fn has_unique_index(conn: &mut SqliteConnection, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM pragma_index_list('images') AS il, pragma_index_info(il.name) AS ii
        WHERE il."unique" = 1 AND ii.name = ?
        "#,
    )
    .bind(column)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to inspect indexes on images: {}",
            e
        )))
    })?;

    Ok(count > 0)
}

/// `<path>.backup`, or a timestamped variant when an earlier backup is still there
async fn backup_path(path: &Path) -> PathBuf {
    let backup = with_suffix(path, ".backup");
    if tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        with_suffix(
            path,
            &format!(".backup.{}", chrono::Utc::now().timestamp()),
        )
    } else {
        backup
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
