//! SQLite backend implementation using sqlx.
//!
//! Provides connection pooling and database operations for SQLite.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a statement waits on a locked database before failing.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How hard SQLite syncs the WAL on commit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SyncMode {
    /// fsync on every commit; an acknowledged write survives power loss.
    #[default]
    Full,
    /// fsync at checkpoints only; survives process crashes, not power loss.
    Normal,
}

impl From<SyncMode> for SqliteSynchronous {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Full => SqliteSynchronous::Full,
            SyncMode::Normal => SqliteSynchronous::Normal,
        }
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub sync_mode: SyncMode,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sync_mode: SyncMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            acquire_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// SQLite connection pool wrapper.
///
/// Wraps sqlx's SqlitePool with sensible defaults for WAL mode and connection pooling.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool").finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Connect to a SQLite database with default settings.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/canline.db`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        Self::connect_with(url, &PoolConfig::default()).await
    }

    /// Connect to a SQLite database.
    ///
    /// # Configuration
    ///
    /// - WAL journal mode so readers never block the writer
    /// - Synchronous mode from `config` (FULL unless relaxed)
    /// - Create database if not exists
    ///
    /// In-memory databases are private to a connection, so they get exactly
    /// one connection that is never recycled.
    pub async fn connect_with(url: &str, config: &PoolConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(config.sync_mode.into())
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
        pool_options = if is_memory_url(url) {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;

        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Run a WAL checkpoint, truncating the log when `truncate` is set.
    pub async fn checkpoint(&self, truncate: bool) -> Result<(), StorageError> {
        let sql = if truncate {
            "PRAGMA wal_checkpoint(TRUNCATE)"
        } else {
            "PRAGMA wal_checkpoint(PASSIVE)"
        };
        sqlx::query(sql).execute(&self.inner).await?;
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Whether the URL names a connection-private in-memory database.
pub fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Filesystem path of the database a URL points at, if any.
pub fn database_path(url: &str) -> Option<PathBuf> {
    if is_memory_url(url) {
        return None;
    }
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_pool_connect() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        assert!(!pool.is_closed());

        // Verify we can execute a query
        let row: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        pool.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_sqlite_pool_wal_mode() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("wal.db").display());
        let pool = SqlitePool::connect(&url).await.unwrap();

        let row: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(row.0, "wal");

        let row: (i64,) = sqlx::query_as("PRAGMA synchronous")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        // FULL = 2
        assert_eq!(row.0, 2);

        pool.checkpoint(true).await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_memory_pool_keeps_single_database() {
        let pool = SqlitePool::connect_with(
            "sqlite::memory:",
            &PoolConfig {
                max_connections: 8,
                ..PoolConfig::default()
            },
        )
        .await
        .unwrap();

        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(pool.inner())
            .await
            .unwrap();

        // A second acquisition must see the same database.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(
            database_path("sqlite:data/canline.db"),
            Some(PathBuf::from("data/canline.db"))
        );
        assert_eq!(
            database_path("sqlite:///var/lib/canline.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/canline.db"))
        );
        assert_eq!(database_path("plain.db"), Some(PathBuf::from("plain.db")));
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!(SyncMode::from_str("NORMAL").unwrap(), SyncMode::Normal);
        assert_eq!(SyncMode::default().as_ref(), "full");
    }
}
