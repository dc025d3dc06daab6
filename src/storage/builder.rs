//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::storage::StorageError;
use crate::storage::actor::DbActor;
use crate::storage::aggregates::AggregateReader;
use crate::storage::db::{PoolConfig, SqlitePool, SyncMode, database_path, is_memory_url};
use crate::storage::{
    EventReader, FaultReader, MetricReader, QueryService, StorageAdmin, StorageWriter,
};

/// Default channel capacity for writer commands.
///
/// Producers wait for an acknowledgement, so this only bounds how many
/// concurrent callers can queue before `send` starts to apply backpressure.
const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Minimum connection pool size.
const MIN_POOL_SIZE: u32 = 2;

/// Maximum connection pool size.
const MAX_POOL_SIZE: u32 = 32;

/// Calculate default pool size based on available CPU parallelism.
///
/// Returns the number of available CPUs, clamped between MIN_POOL_SIZE and MAX_POOL_SIZE.
fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|p| (p.get() as u32).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE))
        .unwrap_or(4)
}

/// Default WAL checkpoint interval.
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    url: String,
    pool_size: u32,
    channel_capacity: usize,
    checkpoint_interval: Duration,
    sync_mode: SyncMode,
    busy_timeout: Option<Duration>,
}

impl StorageBuilder {
    /// Create a new storage builder for a SQLite URL such as
    /// `sqlite:data/canline.db` or `sqlite::memory:`.
    ///
    /// Pool size defaults to the number of available CPUs (clamped to 2-32).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: default_pool_size(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            sync_mode: SyncMode::default(),
            busy_timeout: None,
        }
    }

    /// Set the connection pool size for readers.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the WAL checkpoint interval.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Relax or tighten commit durability. Defaults to [`SyncMode::Full`].
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    fn pool_config(&self, max_connections: u32) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            max_connections,
            sync_mode: self.sync_mode,
            busy_timeout: self.busy_timeout.unwrap_or(defaults.busy_timeout),
            ..defaults
        }
    }

    /// Build the storage layer and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(path) = database_path(&self.url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // The writer owns exactly one connection.
        let write_pool = SqlitePool::connect_with(&self.url, &self.pool_config(1)).await?;
        let (actor_handle, tx) = DbActor::spawn(
            write_pool.clone(),
            self.channel_capacity,
            self.checkpoint_interval,
        )
        .await?;

        // An in-memory database exists only inside its one connection, so
        // readers share the writer's pool.
        let read_pool = if is_memory_url(&self.url) {
            write_pool.clone()
        } else {
            SqlitePool::connect_with(
                &self.url,
                &self.pool_config(self.pool_size.clamp(1, MAX_POOL_SIZE)),
            )
            .await?
        };

        tracing::info!(
            url = %self.url,
            pool_size = self.pool_size,
            sync_mode = %self.sync_mode,
            "Storage ready"
        );

        let event_reader = EventReader::new(read_pool.clone());
        let fault_reader = FaultReader::new(read_pool.clone());
        let metric_reader = MetricReader::new(read_pool.clone());
        let aggregates = AggregateReader::new(read_pool.clone());
        let query = QueryService::new(
            event_reader.clone(),
            fault_reader.clone(),
            metric_reader.clone(),
            aggregates.clone(),
        );

        Ok(StorageHandles {
            writer: StorageWriter::new(tx.clone()),
            event_reader,
            fault_reader,
            metric_reader,
            aggregates,
            query,
            admin: StorageAdmin::new(tx),
            actor_handle: Some(actor_handle),
            write_pool,
            read_pool,
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Writer facade for events, faults and metrics.
    pub writer: StorageWriter,
    /// Facade for reading production events.
    pub event_reader: EventReader,
    /// Facade for reading fault logs.
    pub fault_reader: FaultReader,
    /// Facade for reading health snapshots.
    pub metric_reader: MetricReader,
    /// Derived views.
    pub aggregates: AggregateReader,
    /// Dashboard-style queries.
    pub query: QueryService,
    /// Facade for storage administration.
    pub admin: StorageAdmin,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
    write_pool: SqlitePool,
    read_pool: SqlitePool,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles").finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends shutdown command to the writer actor, waits for it to finish
    /// its final checkpoint, then closes both pools.
    pub async fn shutdown(mut self) -> Result<(), StorageError> {
        self.admin.shutdown().await?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .await
                .map_err(|e| StorageError::Internal(format!("Failed to join actor task: {e}")))?;
        }

        self.read_pool.close().await;
        self.write_pool.close().await;
        Ok(())
    }
}

impl Drop for StorageHandles {
    fn drop(&mut self) {
        // Best effort: the actor finishes on its own once it sees the command.
        if self.actor_handle.take().is_some() {
            let _ = self.admin.try_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{FaultSeverity, NewFaultLog, NewProductionEvent, QualityResult};
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_storage_builder_memory() {
        let handles = StorageBuilder::new("sqlite::memory:")
            .pool_size(8)
            .build()
            .await
            .unwrap();

        let id = handles
            .writer
            .append_event(NewProductionEvent::new(
                "CAN1",
                900,
                330.0,
                true,
                QualityResult::Pass,
            ))
            .await
            .unwrap();

        // Readers see the write as soon as it is acknowledged.
        let event = handles.event_reader.by_id(id).await.unwrap().unwrap();
        assert_eq!(event.can_id, "CAN1");

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/line.db").display());

        {
            let handles = StorageBuilder::new(&url).build().await.unwrap();
            handles
                .writer
                .append_fault(NewFaultLog::new(
                    "F1",
                    "S1",
                    "jam",
                    FaultSeverity::High,
                    Utc::now(),
                ))
                .await
                .unwrap();
            handles.shutdown().await.unwrap();
        }

        let handles = StorageBuilder::new(&url)
            .sync_mode(SyncMode::Normal)
            .build()
            .await
            .unwrap();
        let fault = handles.fault_reader.by_id("F1").await.unwrap().unwrap();
        assert_eq!(fault.severity, FaultSeverity::High);
        assert!(fault.is_open());
        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_without_shutdown_stops_actor() {
        let handles = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let writer = handles.writer.clone();
        drop(handles);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            writer
                .append_event(NewProductionEvent::new(
                    "LATE",
                    900,
                    330.0,
                    true,
                    QualityResult::Pass
                ))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_default_pool_size_within_bounds() {
        let size = super::default_pool_size();
        assert!(size >= super::MIN_POOL_SIZE);
        assert!(size <= super::MAX_POOL_SIZE);
    }
}
