//! Derived views over the record streams.
//!
//! Every view is a single SQL statement evaluated against current table
//! contents, so a read always reflects the latest committed write and sees
//! one consistent snapshot. Nothing is cached.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{FromRow, Row};

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::FaultSeverity;

// =============================================================================
// Result Types
// =============================================================================

/// Daily production totals, one row per UTC calendar date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionSummary {
    pub date: NaiveDate,
    pub total: i64,
    pub passed: i64,
    pub failed: i64,
    pub avg_cycle_time_ms: f64,
    pub avg_fill_level_ml: f64,
    pub pass_rate_pct: f64,
}

/// Whole-history cycle time and fill level statistics.
///
/// With no events every statistic is `None`. With a single event the means,
/// min and max are set and the sample standard deviations are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub count: i64,
    pub avg_cycle_time_ms: Option<f64>,
    pub stddev_cycle_time_ms: Option<f64>,
    pub min_cycle_time_ms: Option<i64>,
    pub max_cycle_time_ms: Option<i64>,
    pub avg_fill_level_ml: Option<f64>,
    pub stddev_fill_level_ml: Option<f64>,
}

/// Fault frequency for one (fault_type, severity) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultAnalysis {
    pub fault_type: String,
    pub severity: FaultSeverity,
    pub occurrences: i64,
    /// Mean delay between detection and the row being logged.
    pub avg_log_latency_ms: f64,
    /// Mean detection-to-clearance time over cleared faults only.
    pub avg_time_to_clear_ms: Option<f64>,
    pub resolved_count: i64,
}

/// Failed cans grouped by reject reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectBreakdown {
    pub reject_reason: Option<String>,
    pub failures: i64,
    /// Share of all failed cans, in percent.
    pub share_pct: f64,
}

// =============================================================================
// SQL
// =============================================================================

const SUMMARY_SQL: &str = r#"
SELECT date(timestamp / 1000.0, 'unixepoch') AS day,
       COUNT(*) AS total,
       SUM(CASE WHEN quality_result = 'PASS' THEN 1 ELSE 0 END) AS passed,
       SUM(CASE WHEN quality_result = 'FAIL' THEN 1 ELSE 0 END) AS failed,
       ROUND(AVG(cycle_time_ms), 2) AS avg_cycle_time_ms,
       ROUND(AVG(fill_level_ml), 2) AS avg_fill_level_ml,
       ROUND(100.0 * SUM(CASE WHEN quality_result = 'PASS' THEN 1 ELSE 0 END) / COUNT(*), 2)
           AS pass_rate_pct
FROM production_events
GROUP BY day
ORDER BY day DESC
"#;

// Two-pass variance: the correlated subqueries reuse the means from `agg`.
const PERFORMANCE_SQL: &str = r#"
WITH agg AS (
    SELECT COUNT(*) AS n,
           AVG(cycle_time_ms) AS avg_cycle,
           MIN(cycle_time_ms) AS min_cycle,
           MAX(cycle_time_ms) AS max_cycle,
           AVG(fill_level_ml) AS avg_fill
    FROM production_events
)
SELECT agg.n AS n,
       agg.avg_cycle AS avg_cycle,
       agg.min_cycle AS min_cycle,
       agg.max_cycle AS max_cycle,
       agg.avg_fill AS avg_fill,
       CASE WHEN agg.n > 1 THEN
           (SELECT SUM((e.cycle_time_ms - agg.avg_cycle) * (e.cycle_time_ms - agg.avg_cycle))
            FROM production_events e) / (agg.n - 1)
       END AS var_cycle,
       CASE WHEN agg.n > 1 THEN
           (SELECT SUM((e.fill_level_ml - agg.avg_fill) * (e.fill_level_ml - agg.avg_fill))
            FROM production_events e) / (agg.n - 1)
       END AS var_fill
FROM agg
"#;

const FAULT_ANALYSIS_SQL: &str = r#"
SELECT fault_type,
       severity,
       COUNT(*) AS occurrences,
       ROUND(AVG(logged_at - detected_at), 2) AS avg_log_latency_ms,
       ROUND(AVG(CASE WHEN cleared_at IS NOT NULL THEN cleared_at - detected_at END), 2)
           AS avg_time_to_clear_ms,
       COUNT(cleared_at) AS resolved_count
FROM fault_logs
GROUP BY fault_type, severity
ORDER BY occurrences DESC,
         fault_type ASC,
         CASE severity
             WHEN 'CRITICAL' THEN 0
             WHEN 'HIGH' THEN 1
             WHEN 'MEDIUM' THEN 2
             ELSE 3
         END ASC
"#;

const REJECT_BREAKDOWN_SQL: &str = r#"
SELECT reject_reason,
       COUNT(*) AS failures,
       ROUND(100.0 * COUNT(*) /
             (SELECT COUNT(*) FROM production_events WHERE quality_result = 'FAIL'), 2)
           AS share_pct
FROM production_events
WHERE quality_result = 'FAIL'
GROUP BY reject_reason
ORDER BY failures DESC, reject_reason ASC
"#;

#[derive(Debug, FromRow)]
struct SummaryRow {
    day: String,
    total: i64,
    passed: i64,
    failed: i64,
    avg_cycle_time_ms: f64,
    avg_fill_level_ml: f64,
    pass_rate_pct: f64,
}

#[derive(Debug, FromRow)]
struct FaultAnalysisRow {
    fault_type: String,
    severity: String,
    occurrences: i64,
    avg_log_latency_ms: f64,
    avg_time_to_clear_ms: Option<f64>,
    resolved_count: i64,
}

// =============================================================================
// Reader
// =============================================================================

/// Read-only access to the derived views.
#[derive(Clone)]
pub struct AggregateReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for AggregateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateReader").finish_non_exhaustive()
    }
}

impl AggregateReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Daily production summary, newest date first.
    pub async fn production_summary(&self) -> Result<Vec<ProductionSummary>, StorageError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(SUMMARY_SQL)
            .fetch_all(self.pool.inner())
            .await?;

        rows.into_iter()
            .map(|row| {
                let date = NaiveDate::parse_from_str(&row.day, "%Y-%m-%d").map_err(|e| {
                    StorageError::InvalidData(format!("summary date '{}': {e}", row.day))
                })?;
                Ok(ProductionSummary {
                    date,
                    total: row.total,
                    passed: row.passed,
                    failed: row.failed,
                    avg_cycle_time_ms: row.avg_cycle_time_ms,
                    avg_fill_level_ml: row.avg_fill_level_ml,
                    pass_rate_pct: row.pass_rate_pct,
                })
            })
            .collect()
    }

    /// Whole-history performance statistics.
    pub async fn performance_stats(&self) -> Result<PerformanceStats, StorageError> {
        let row = sqlx::query(PERFORMANCE_SQL)
            .fetch_one(self.pool.inner())
            .await?;

        let count: i64 = row.try_get("n")?;
        if count == 0 {
            return Ok(PerformanceStats::default());
        }

        let var_cycle: Option<f64> = row.try_get("var_cycle")?;
        let var_fill: Option<f64> = row.try_get("var_fill")?;

        Ok(PerformanceStats {
            count,
            avg_cycle_time_ms: row.try_get::<Option<f64>, _>("avg_cycle")?.map(round2),
            stddev_cycle_time_ms: var_cycle.map(stddev),
            min_cycle_time_ms: row.try_get("min_cycle")?,
            max_cycle_time_ms: row.try_get("max_cycle")?,
            avg_fill_level_ml: row.try_get::<Option<f64>, _>("avg_fill")?.map(round2),
            stddev_fill_level_ml: var_fill.map(stddev),
        })
    }

    /// Fault frequency by (fault_type, severity), most frequent first.
    ///
    /// Ties are broken by fault_type ascending, then by severity from
    /// CRITICAL down to LOW.
    pub async fn fault_analysis(&self) -> Result<Vec<FaultAnalysis>, StorageError> {
        let rows: Vec<FaultAnalysisRow> = sqlx::query_as(FAULT_ANALYSIS_SQL)
            .fetch_all(self.pool.inner())
            .await?;

        rows.into_iter()
            .map(|row| {
                let severity = row.severity.parse::<FaultSeverity>().map_err(|_| {
                    StorageError::InvalidData(format!("fault severity '{}'", row.severity))
                })?;
                Ok(FaultAnalysis {
                    fault_type: row.fault_type,
                    severity,
                    occurrences: row.occurrences,
                    avg_log_latency_ms: row.avg_log_latency_ms,
                    avg_time_to_clear_ms: row.avg_time_to_clear_ms,
                    resolved_count: row.resolved_count,
                })
            })
            .collect()
    }

    /// Failed cans by reject reason, most common first.
    pub async fn reject_breakdown(&self) -> Result<Vec<RejectBreakdown>, StorageError> {
        let rows = sqlx::query(REJECT_BREAKDOWN_SQL)
            .fetch_all(self.pool.inner())
            .await?;

        rows.iter()
            .map(|row| {
                Ok(RejectBreakdown {
                    reject_reason: row.try_get("reject_reason")?,
                    failures: row.try_get("failures")?,
                    share_pct: row.try_get("share_pct")?,
                })
            })
            .collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounding noise can push a zero variance slightly negative.
fn stddev(variance: f64) -> f64 {
    round2(variance.max(0.0).sqrt())
}
