//! Database schema definitions and migrations.
//!
//! The DDL lives in `migrations/` and is embedded at compile time. Tables
//! carry the data-model invariants as CHECK constraints so rows written
//! outside this crate are held to the same rules.

use sqlx::migrate::Migrator;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const PRODUCTION_EVENTS_TABLE: &str = "production_events";
pub const FAULT_LOGS_TABLE: &str = "fault_logs";
pub const SYSTEM_METRICS_TABLE: &str = "system_metrics";

/// Initialize the database schema.
///
/// Applies any pending migrations; already-applied ones are skipped.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    MIGRATOR.run(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn migrated_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    async fn object_exists(pool: &SqlitePool, kind: &str, name: &str) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = ? AND name = ?")
                .bind(kind)
                .bind(name)
                .fetch_one(pool.inner())
                .await
                .unwrap();
        count == 1
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let pool = migrated_pool().await;

        for table in [PRODUCTION_EVENTS_TABLE, FAULT_LOGS_TABLE, SYSTEM_METRICS_TABLE] {
            assert!(object_exists(&pool, "table", table).await, "missing {table}");
        }

        for index in [
            "idx_production_events_timestamp",
            "idx_production_events_quality",
            "idx_fault_logs_sensor",
            "idx_fault_logs_severity",
            "idx_fault_logs_open",
            "idx_system_metrics_recorded_at",
        ] {
            assert!(object_exists(&pool, "index", index).await, "missing {index}");
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = migrated_pool().await;
        init_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_quality_check_constraint() {
        let pool = migrated_pool().await;

        let err = sqlx::query(
            "INSERT INTO production_events
                 (can_id, timestamp, cycle_time_ms, fill_level_ml, seal_verified, quality_result)
             VALUES ('CAN1', 0, 900, 330.0, 1, 'MAYBE')",
        )
        .execute(pool.inner())
        .await
        .unwrap_err();

        let db = err.as_database_error().expect("database error");
        assert!(db.is_check_violation());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM production_events")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_fault_clearance_check_constraint() {
        let pool = migrated_pool().await;

        let err = sqlx::query(
            "INSERT INTO fault_logs (id, sensor_id, fault_type, severity, detected_at, logged_at, cleared_at)
             VALUES ('F1', 'S1', 'jam', 'HIGH', 1000, 1000, 999)",
        )
        .execute(pool.inner())
        .await
        .unwrap_err();
        assert!(err.as_database_error().unwrap().is_check_violation());
    }

    #[tokio::test]
    async fn test_metric_counter_check_constraint() {
        let pool = migrated_pool().await;

        let err = sqlx::query(
            "INSERT INTO system_metrics
                 (recorded_at, cans_processed, cans_passed, cans_failed, avg_cycle_time_ms, system_mode, uptime_seconds)
             VALUES (0, 5, 4, 2, 900.0, 'RUNNING', 10)",
        )
        .execute(pool.inner())
        .await
        .unwrap_err();
        assert!(err.as_database_error().unwrap().is_check_violation());
    }
}
