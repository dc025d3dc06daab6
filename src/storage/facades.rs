//! User-facing storage facades.
//!
//! Provides ergonomic APIs for storage operations:
//! - `StorageWriter`: Acknowledged writes through the writer actor
//! - `EventReader` / `FaultReader` / `MetricReader`: Filtered record queries
//! - `QueryService`: Dashboard-style reads over records and derived views
//! - `StorageAdmin`: Retention and maintenance

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use strum_macros::{AsRefStr, EnumString};
use tokio::sync::mpsc;

use crate::storage::StorageError;
use crate::storage::actor::{Command, request};
use crate::storage::aggregates::{
    AggregateReader, FaultAnalysis, PerformanceStats, ProductionSummary, RejectBreakdown,
};
use crate::storage::db::SqlitePool;
use crate::storage::rows::{
    EVENT_COLUMNS, EventRow, FAULT_COLUMNS, FaultRow, METRIC_COLUMNS, MetricRow, convert_all,
};
use crate::storage::types::{
    CloseOutcome, FaultLog, FaultSeverity, IngestOutcome, IngestPayload, NewFaultLog,
    NewProductionEvent, NewSystemMetric, ProductionEvent, QualityResult, SystemMetric, to_millis,
};

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 10_000;

fn effective_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

// =============================================================================
// Query Types
// =============================================================================

/// Sort order for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Query for production events. Unset bounds are open.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub quality: Option<QualityResult>,
    pub can_id: Option<String>,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

/// Query for faults, filtered on detection time.
#[derive(Debug, Clone, Default)]
pub struct FaultQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub sensor_id: Option<String>,
    pub severity: Option<FaultSeverity>,
    pub fault_type: Option<String>,
    pub open_only: bool,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

/// Query for health snapshots.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub system_mode: Option<String>,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

/// Appends `AND column >= start AND column <= end` for whichever bounds are set.
fn push_time_range(
    qb: &mut QueryBuilder<'_, Sqlite>,
    column: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) {
    if let Some(start) = start {
        qb.push(format!(" AND {column} >= "));
        qb.push_bind(to_millis(start));
    }
    if let Some(end) = end {
        qb.push(format!(" AND {column} <= "));
        qb.push_bind(to_millis(end));
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Storage writer.
///
/// Every call waits for the writer actor to commit and returns the outcome,
/// so a successful return means the record is durable.
#[derive(Clone)]
pub struct StorageWriter {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter").finish_non_exhaustive()
    }
}

impl StorageWriter {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Append a production event and return its assigned id.
    pub async fn append_event(&self, event: NewProductionEvent) -> Result<i64, StorageError> {
        request(&self.tx, |reply| Command::AppendEvent { event, reply }).await
    }

    /// Append a fault record and return its id.
    pub async fn append_fault(&self, fault: NewFaultLog) -> Result<String, StorageError> {
        request(&self.tx, |reply| Command::AppendFault { fault, reply }).await
    }

    /// Append a health snapshot and return its assigned id.
    pub async fn append_metric(&self, metric: NewSystemMetric) -> Result<i64, StorageError> {
        request(&self.tx, |reply| Command::AppendMetric { metric, reply }).await
    }

    /// Record when a fault was cleared.
    ///
    /// Closing an already closed fault is a no-op that reports the stored
    /// clearance time.
    pub async fn close_fault(
        &self,
        id: impl Into<String>,
        cleared_at: DateTime<Utc>,
    ) -> Result<CloseOutcome, StorageError> {
        let id = id.into();
        request(&self.tx, |reply| Command::CloseFault {
            id,
            cleared_at,
            reply,
        })
        .await
    }

    /// Route a decoded ingest payload to the matching write.
    pub async fn ingest(&self, payload: IngestPayload) -> Result<IngestOutcome, StorageError> {
        match payload {
            IngestPayload::Event(event) => {
                let id = self.append_event(event).await?;
                Ok(IngestOutcome::Event { id })
            }
            IngestPayload::Fault(fault) => {
                let id = self.append_fault(fault).await?;
                Ok(IngestOutcome::Fault { id })
            }
            IngestPayload::Metric(metric) => {
                let id = self.append_metric(metric).await?;
                Ok(IngestOutcome::Metric { id })
            }
            IngestPayload::FaultCleared { id, cleared_at } => {
                let result = self.close_fault(id.clone(), cleared_at).await?;
                Ok(IngestOutcome::FaultCleared { id, result })
            }
        }
    }

    /// Decode one JSON document and ingest it.
    pub async fn ingest_json(&self, raw: &str) -> Result<IngestOutcome, StorageError> {
        let payload = IngestPayload::from_json(raw)?;
        self.ingest(payload).await
    }
}

// =============================================================================
// Readers
// =============================================================================

/// Production event reader.
#[derive(Clone)]
pub struct EventReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader").finish_non_exhaustive()
    }
}

impl EventReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<ProductionEvent>, StorageError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM production_events WHERE id = ?");
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(ProductionEvent::try_from).transpose()
    }

    /// Most recent events, newest first. Ties on timestamp fall back to
    /// insertion order.
    pub async fn recent(&self, limit: Option<u32>) -> Result<Vec<ProductionEvent>, StorageError> {
        self.query(EventQuery {
            limit,
            ..Default::default()
        })
        .await
    }

    /// Query events with filters.
    pub async fn query(&self, q: EventQuery) -> Result<Vec<ProductionEvent>, StorageError> {
        let order = q.order.unwrap_or_default().as_sql();

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM production_events WHERE 1 = 1"
        ));
        push_time_range(&mut qb, "timestamp", q.start, q.end);
        if let Some(quality) = q.quality {
            qb.push(" AND quality_result = ");
            qb.push_bind(quality.as_ref().to_string());
        }
        if let Some(can_id) = q.can_id {
            qb.push(" AND can_id = ");
            qb.push_bind(can_id);
        }
        qb.push(format!(" ORDER BY timestamp {order}, id {order} LIMIT "));
        qb.push_bind(i64::from(effective_limit(q.limit)));

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(self.pool.inner()).await?;
        convert_all(rows)
    }
}

/// Fault log reader.
#[derive(Clone)]
pub struct FaultReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for FaultReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultReader").finish_non_exhaustive()
    }
}

impl FaultReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, id: &str) -> Result<Option<FaultLog>, StorageError> {
        let sql = format!("SELECT {FAULT_COLUMNS} FROM fault_logs WHERE id = ?");
        let row: Option<FaultRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(FaultLog::try_from).transpose()
    }

    /// All uncleared faults, oldest detection first.
    pub async fn open(&self) -> Result<Vec<FaultLog>, StorageError> {
        let sql = format!(
            "SELECT {FAULT_COLUMNS} FROM fault_logs
             WHERE cleared_at IS NULL
             ORDER BY detected_at ASC, id ASC"
        );
        let rows: Vec<FaultRow> = sqlx::query_as(&sql).fetch_all(self.pool.inner()).await?;
        convert_all(rows)
    }

    /// Query faults with filters.
    pub async fn query(&self, q: FaultQuery) -> Result<Vec<FaultLog>, StorageError> {
        let order = q.order.unwrap_or_default().as_sql();

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {FAULT_COLUMNS} FROM fault_logs WHERE 1 = 1"));
        push_time_range(&mut qb, "detected_at", q.start, q.end);
        if let Some(sensor_id) = q.sensor_id {
            qb.push(" AND sensor_id = ");
            qb.push_bind(sensor_id);
        }
        if let Some(severity) = q.severity {
            qb.push(" AND severity = ");
            qb.push_bind(severity.as_ref().to_string());
        }
        if let Some(fault_type) = q.fault_type {
            qb.push(" AND fault_type = ");
            qb.push_bind(fault_type);
        }
        if q.open_only {
            qb.push(" AND cleared_at IS NULL");
        }
        qb.push(format!(" ORDER BY detected_at {order}, id {order} LIMIT "));
        qb.push_bind(i64::from(effective_limit(q.limit)));

        let rows: Vec<FaultRow> = qb.build_query_as().fetch_all(self.pool.inner()).await?;
        convert_all(rows)
    }
}

/// Health snapshot reader.
#[derive(Clone)]
pub struct MetricReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for MetricReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricReader").finish_non_exhaustive()
    }
}

impl MetricReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<SystemMetric>, StorageError> {
        let sql = format!("SELECT {METRIC_COLUMNS} FROM system_metrics WHERE id = ?");
        let row: Option<MetricRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(SystemMetric::try_from).transpose()
    }

    /// The newest snapshot, if any has been recorded.
    pub async fn latest(&self) -> Result<Option<SystemMetric>, StorageError> {
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM system_metrics
             ORDER BY recorded_at DESC, id DESC LIMIT 1"
        );
        let row: Option<MetricRow> = sqlx::query_as(&sql)
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(SystemMetric::try_from).transpose()
    }

    /// Query snapshots with filters.
    pub async fn query(&self, q: MetricQuery) -> Result<Vec<SystemMetric>, StorageError> {
        let order = q.order.unwrap_or_default().as_sql();

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {METRIC_COLUMNS} FROM system_metrics WHERE 1 = 1"
        ));
        push_time_range(&mut qb, "recorded_at", q.start, q.end);
        if let Some(mode) = q.system_mode {
            qb.push(" AND system_mode = ");
            qb.push_bind(mode);
        }
        qb.push(format!(" ORDER BY recorded_at {order}, id {order} LIMIT "));
        qb.push_bind(i64::from(effective_limit(q.limit)));

        let rows: Vec<MetricRow> = qb.build_query_as().fetch_all(self.pool.inner()).await?;
        convert_all(rows)
    }
}

// =============================================================================
// Query Service
// =============================================================================

/// Read-side entry point for dashboards and reports.
#[derive(Clone)]
pub struct QueryService {
    events: EventReader,
    faults: FaultReader,
    metrics: MetricReader,
    aggregates: AggregateReader,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService").finish_non_exhaustive()
    }
}

impl QueryService {
    pub(crate) fn new(
        events: EventReader,
        faults: FaultReader,
        metrics: MetricReader,
        aggregates: AggregateReader,
    ) -> Self {
        Self {
            events,
            faults,
            metrics,
            aggregates,
        }
    }

    /// Newest production events; `limit` defaults to 100 and is capped at 10,000.
    /// A limit of 0 returns nothing.
    pub async fn get_recent_events(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<ProductionEvent>, StorageError> {
        self.events.recent(limit).await
    }

    pub async fn get_summary(&self) -> Result<Vec<ProductionSummary>, StorageError> {
        self.aggregates.production_summary().await
    }

    pub async fn get_performance_stats(&self) -> Result<PerformanceStats, StorageError> {
        self.aggregates.performance_stats().await
    }

    pub async fn get_fault_analysis(&self) -> Result<Vec<FaultAnalysis>, StorageError> {
        self.aggregates.fault_analysis().await
    }

    pub async fn get_open_faults(&self) -> Result<Vec<FaultLog>, StorageError> {
        self.faults.open().await
    }

    pub async fn get_reject_breakdown(&self) -> Result<Vec<RejectBreakdown>, StorageError> {
        self.aggregates.reject_breakdown().await
    }

    pub async fn get_latest_metric(&self) -> Result<Option<SystemMetric>, StorageError> {
        self.metrics.latest().await
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Storage administration.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Delete production events recorded before `before`. Returns the count removed.
    pub async fn trim_events_before(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        request(&self.tx, |reply| Command::TrimEvents { before, reply }).await
    }

    /// Delete health snapshots recorded before `before`. Returns the count removed.
    pub async fn trim_metrics_before(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        request(&self.tx, |reply| Command::TrimMetrics { before, reply }).await
    }

    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        request(&self.tx, |reply| Command::Checkpoint { reply }).await
    }

    /// Ask the writer to stop once every earlier command has been answered.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| StorageError::ChannelSend)
    }

    pub(crate) fn try_shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .try_send(Command::Shutdown)
            .map_err(|_| StorageError::ChannelSend)
    }
}
