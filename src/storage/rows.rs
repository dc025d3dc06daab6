//! Raw row shapes and their conversion into domain types.

use sqlx::FromRow;

use crate::storage::StorageError;
use crate::storage::types::{
    Diagnostics, FaultLog, FaultSeverity, ProductionEvent, QualityResult, SystemMetric, from_millis,
};

pub(crate) const EVENT_COLUMNS: &str = "id, can_id, timestamp, cycle_time_ms, fill_level_ml, \
     seal_verified, quality_result, reject_reason";

pub(crate) const FAULT_COLUMNS: &str =
    "id, sensor_id, fault_type, severity, detected_at, logged_at, cleared_at, diagnostics";

pub(crate) const METRIC_COLUMNS: &str = "id, recorded_at, cans_processed, cans_passed, \
     cans_failed, avg_cycle_time_ms, system_mode, uptime_seconds";

#[derive(Debug, FromRow)]
pub(crate) struct EventRow {
    id: i64,
    can_id: String,
    timestamp: i64,
    cycle_time_ms: i64,
    fill_level_ml: f64,
    seal_verified: bool,
    quality_result: String,
    reject_reason: Option<String>,
}

impl TryFrom<EventRow> for ProductionEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let quality_result = row.quality_result.parse::<QualityResult>().map_err(|_| {
            StorageError::InvalidData(format!(
                "production_events.id={} has quality_result '{}'",
                row.id, row.quality_result
            ))
        })?;

        Ok(Self {
            id: row.id,
            can_id: row.can_id,
            timestamp: from_millis(row.timestamp)?,
            cycle_time_ms: row.cycle_time_ms,
            fill_level_ml: row.fill_level_ml,
            seal_verified: row.seal_verified,
            quality_result,
            reject_reason: row.reject_reason,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct FaultRow {
    id: String,
    sensor_id: String,
    fault_type: String,
    severity: String,
    detected_at: i64,
    logged_at: i64,
    cleared_at: Option<i64>,
    diagnostics: Option<String>,
}

impl TryFrom<FaultRow> for FaultLog {
    type Error = StorageError;

    fn try_from(row: FaultRow) -> Result<Self, Self::Error> {
        let severity = row.severity.parse::<FaultSeverity>().map_err(|_| {
            StorageError::InvalidData(format!(
                "fault_logs.id={} has severity '{}'",
                row.id, row.severity
            ))
        })?;
        let diagnostics = row
            .diagnostics
            .as_deref()
            .map(serde_json::from_str::<Diagnostics>)
            .transpose()?;

        Ok(Self {
            id: row.id,
            sensor_id: row.sensor_id,
            fault_type: row.fault_type,
            severity,
            detected_at: from_millis(row.detected_at)?,
            logged_at: from_millis(row.logged_at)?,
            cleared_at: row.cleared_at.map(from_millis).transpose()?,
            diagnostics,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MetricRow {
    id: i64,
    recorded_at: i64,
    cans_processed: i64,
    cans_passed: i64,
    cans_failed: i64,
    avg_cycle_time_ms: f64,
    system_mode: String,
    uptime_seconds: i64,
}

impl TryFrom<MetricRow> for SystemMetric {
    type Error = StorageError;

    fn try_from(row: MetricRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            recorded_at: from_millis(row.recorded_at)?,
            cans_processed: row.cans_processed,
            cans_passed: row.cans_passed,
            cans_failed: row.cans_failed,
            avg_cycle_time_ms: row.avg_cycle_time_ms,
            system_mode: row.system_mode,
            uptime_seconds: row.uptime_seconds,
        })
    }
}

/// Convert a batch of rows, failing on the first corrupt one.
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StorageError>
where
    T: TryFrom<R, Error = StorageError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_row_rejects_unknown_quality() {
        let row = EventRow {
            id: 7,
            can_id: "CAN7".to_string(),
            timestamp: 0,
            cycle_time_ms: 900,
            fill_level_ml: 330.0,
            seal_verified: true,
            quality_result: "MAYBE".to_string(),
            reject_reason: None,
        };
        let err = ProductionEvent::try_from(row).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn test_fault_row_decodes_diagnostics() {
        let row = FaultRow {
            id: "F1".to_string(),
            sensor_id: "S1".to_string(),
            fault_type: "jam".to_string(),
            severity: "CRITICAL".to_string(),
            detected_at: 1_000,
            logged_at: 1_020,
            cleared_at: None,
            diagnostics: Some(r#"{"b":1,"a":"x"}"#.to_string()),
        };
        let fault = FaultLog::try_from(row).unwrap();
        assert!(fault.is_open());
        assert_eq!(fault.severity, FaultSeverity::Critical);
        let keys: Vec<_> = fault.diagnostics.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
