//! Writer actor with dedicated connection and MPSC channel.
//!
//! Single-writer pattern: one task owns the write connection and processes
//! commands one at a time in arrival order. Every command carries a oneshot
//! reply that is answered only after the write has committed, so there is no
//! write buffering and an acknowledged record is durable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::schema::init_schema;
use crate::storage::types::{
    CloseOutcome, NewFaultLog, NewProductionEvent, NewSystemMetric, check_clearance, from_millis,
    to_millis,
};

// =============================================================================
// Constants
// =============================================================================

/// Lower bound for the periodic WAL checkpoint interval.
const MIN_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Commands
// =============================================================================

pub(crate) type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Append a production event; replies with its surrogate id.
    AppendEvent {
        event: NewProductionEvent,
        reply: Reply<i64>,
    },
    /// Append a fault; replies with the caller-assigned id.
    AppendFault {
        fault: NewFaultLog,
        reply: Reply<String>,
    },
    /// Append a health snapshot; replies with its surrogate id.
    AppendMetric {
        metric: NewSystemMetric,
        reply: Reply<i64>,
    },
    /// Record the clearance time of a fault.
    CloseFault {
        id: String,
        cleared_at: DateTime<Utc>,
        reply: Reply<CloseOutcome>,
    },
    /// Delete production events older than the cutoff.
    TrimEvents {
        before: DateTime<Utc>,
        reply: Reply<u64>,
    },
    /// Delete metric snapshots older than the cutoff.
    TrimMetrics {
        before: DateTime<Utc>,
        reply: Reply<u64>,
    },
    /// Force WAL checkpoint.
    Checkpoint { reply: Reply<()> },
    /// Graceful shutdown.
    Shutdown,
}

/// Send a command built around a fresh reply channel and wait for the answer.
pub(crate) async fn request<T>(
    tx: &mpsc::Sender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, StorageError> {
    let (reply, rx) = oneshot::channel();
    tx.send(build(reply))
        .await
        .map_err(|_| StorageError::ChannelSend)?;
    rx.await.map_err(|_| StorageError::ChannelClosed)?
}

// =============================================================================
// Actor
// =============================================================================

/// Database writer actor.
pub struct DbActor {
    pool: SqlitePool,
    rx: mpsc::Receiver<Command>,
    checkpoint_interval: Duration,
}

impl DbActor {
    /// Initialize the schema and spawn the writer task.
    ///
    /// Returns a tuple of:
    /// - `JoinHandle<()>`: Handle to the actor task
    /// - `mpsc::Sender<Command>`: Channel sender for commands
    pub async fn spawn(
        pool: SqlitePool,
        channel_capacity: usize,
        checkpoint_interval: Duration,
    ) -> Result<(JoinHandle<()>, mpsc::Sender<Command>), StorageError> {
        init_schema(&pool).await?;

        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let actor = DbActor {
            pool,
            rx,
            checkpoint_interval: checkpoint_interval.max(MIN_CHECKPOINT_INTERVAL),
        };
        let handle = tokio::spawn(actor.run());

        Ok((handle, tx))
    }

    async fn run(mut self) {
        tracing::info!("DbActor started");

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.checkpoint_interval,
            self.checkpoint_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break; // Shutdown requested
                        }
                    }
                    None => {
                        tracing::warn!("Channel disconnected, shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.pool.checkpoint(false).await {
                        tracing::error!(error = %e, "Periodic checkpoint failed");
                    }
                }
            }
        }

        if let Err(e) = self.pool.checkpoint(true).await {
            tracing::warn!(error = %e, "Final checkpoint failed");
        }
        tracing::info!("DbActor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::AppendEvent { event, reply } => {
                let result = self.append_event(event).await;
                log_failure("append_event", &result);
                let _ = reply.send(result);
            }
            Command::AppendFault { fault, reply } => {
                let result = self.append_fault(fault).await;
                log_failure("append_fault", &result);
                let _ = reply.send(result);
            }
            Command::AppendMetric { metric, reply } => {
                let result = self.append_metric(metric).await;
                log_failure("append_metric", &result);
                let _ = reply.send(result);
            }
            Command::CloseFault {
                id,
                cleared_at,
                reply,
            } => {
                let result = self.close_fault(&id, cleared_at).await;
                log_failure("close_fault", &result);
                let _ = reply.send(result);
            }
            Command::TrimEvents { before, reply } => {
                let result = self.trim_events(before).await;
                log_failure("trim_events", &result);
                let _ = reply.send(result);
            }
            Command::TrimMetrics { before, reply } => {
                let result = self.trim_metrics(before).await;
                log_failure("trim_metrics", &result);
                let _ = reply.send(result);
            }
            Command::Checkpoint { reply } => {
                let result = self.pool.checkpoint(true).await;
                log_failure("checkpoint", &result);
                let _ = reply.send(result);
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Append Operations
    // =========================================================================

    async fn append_event(&self, event: NewProductionEvent) -> Result<i64, StorageError> {
        event.validate()?;
        let ts = event.timestamp.unwrap_or_else(Utc::now);

        let result = sqlx::query(
            "INSERT INTO production_events
                 (can_id, timestamp, cycle_time_ms, fill_level_ml, seal_verified, quality_result, reject_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.can_id.as_str())
        .bind(to_millis(ts))
        .bind(event.cycle_time_ms)
        .bind(event.fill_level_ml)
        .bind(event.seal_verified)
        .bind(event.quality_result.to_string())
        .bind(event.reject_reason.as_deref())
        .execute(self.pool.inner())
        .await
        .map_err(|e| StorageError::from_constraint(e, "production_event", &event.can_id))?;

        let id = result.last_insert_rowid();
        tracing::debug!(id, can_id = %event.can_id, quality = %event.quality_result, "Production event appended");
        Ok(id)
    }

    async fn append_fault(&self, fault: NewFaultLog) -> Result<String, StorageError> {
        fault.validate()?;

        // Single writer: nothing can insert this id between the check and the insert.
        let existing: Option<i64> = sqlx::query_scalar("SELECT 1 FROM fault_logs WHERE id = ?")
            .bind(fault.id.as_str())
            .fetch_optional(self.pool.inner())
            .await?;
        if existing.is_some() {
            return Err(StorageError::Conflict {
                entity: "fault_log",
                id: fault.id,
            });
        }

        let diagnostics = fault
            .diagnostics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO fault_logs
                 (id, sensor_id, fault_type, severity, detected_at, logged_at, cleared_at, diagnostics)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fault.id.as_str())
        .bind(fault.sensor_id.as_str())
        .bind(fault.fault_type.as_str())
        .bind(fault.severity.to_string())
        .bind(to_millis(fault.detected_at))
        .bind(to_millis(Utc::now()))
        .bind(fault.cleared_at.map(to_millis))
        .bind(diagnostics)
        .execute(self.pool.inner())
        .await
        .map_err(|e| StorageError::from_constraint(e, "fault_log", &fault.id))?;

        tracing::debug!(
            id = %fault.id,
            sensor_id = %fault.sensor_id,
            fault_type = %fault.fault_type,
            severity = %fault.severity,
            "Fault appended"
        );
        Ok(fault.id)
    }

    async fn append_metric(&self, metric: NewSystemMetric) -> Result<i64, StorageError> {
        metric.validate()?;
        let recorded_at = metric.recorded_at.unwrap_or_else(Utc::now);

        let result = sqlx::query(
            "INSERT INTO system_metrics
                 (recorded_at, cans_processed, cans_passed, cans_failed, avg_cycle_time_ms, system_mode, uptime_seconds)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_millis(recorded_at))
        .bind(metric.cans_processed)
        .bind(metric.cans_passed)
        .bind(metric.cans_failed)
        .bind(metric.avg_cycle_time_ms)
        .bind(metric.system_mode.as_str())
        .bind(metric.uptime_seconds)
        .execute(self.pool.inner())
        .await
        .map_err(|e| StorageError::from_constraint(e, "system_metric", &metric.system_mode))?;

        let id = result.last_insert_rowid();
        tracing::debug!(id, mode = %metric.system_mode, "System metric appended");
        Ok(id)
    }

    // =========================================================================
    // Fault Clearance
    // =========================================================================

    /// Closing is idempotent: a second close reports the stored time and
    /// leaves the row untouched.
    async fn close_fault(
        &self,
        id: &str,
        cleared_at: DateTime<Utc>,
    ) -> Result<CloseOutcome, StorageError> {
        let mut tx = self.pool.inner().begin().await?;

        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT detected_at, cleared_at FROM fault_logs WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((detected_at, existing)) = row else {
            return Err(StorageError::NotFound {
                entity: "fault_log",
                id: id.to_string(),
            });
        };

        if let Some(existing) = existing {
            tracing::debug!(id, "Fault already closed");
            return Ok(CloseOutcome::AlreadyClosed {
                cleared_at: from_millis(existing)?,
            });
        }

        check_clearance(id, from_millis(detected_at)?, cleared_at)?;

        let cleared_ms = to_millis(cleared_at);
        sqlx::query("UPDATE fault_logs SET cleared_at = ? WHERE id = ? AND cleared_at IS NULL")
            .bind(cleared_ms)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(id, time_to_clear_ms = cleared_ms - detected_at, "Fault closed");
        Ok(CloseOutcome::Closed {
            cleared_at: from_millis(cleared_ms)?,
        })
    }

    // =========================================================================
    // Maintenance Operations
    // =========================================================================

    async fn trim_events(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let deleted = sqlx::query("DELETE FROM production_events WHERE timestamp < ?")
            .bind(to_millis(before))
            .execute(self.pool.inner())
            .await?
            .rows_affected();
        tracing::info!(deleted, %before, "Production events trimmed");
        Ok(deleted)
    }

    async fn trim_metrics(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let deleted = sqlx::query("DELETE FROM system_metrics WHERE recorded_at < ?")
            .bind(to_millis(before))
            .execute(self.pool.inner())
            .await?
            .rows_affected();
        tracing::info!(deleted, %before, "System metrics trimmed");
        Ok(deleted)
    }
}

fn log_failure<T>(op: &'static str, result: &Result<T, StorageError>) {
    match result {
        Err(e) if e.is_rejection() => tracing::debug!(op, error = %e, "Write rejected"),
        Err(e) => tracing::error!(op, error = %e, "Write failed"),
        Ok(_) => {}
    }
}
