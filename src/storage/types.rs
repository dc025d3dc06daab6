//! Core data types for the storage layer.
//!
//! This module defines the three append-only record streams and the inputs
//! used to create them:
//!
//! - [`ProductionEvent`]: one row per can filled and quality-checked
//! - [`FaultLog`]: one row per detected fault, cleared at most once
//! - [`SystemMetric`]: one row per periodic health snapshot
//!
//! The enumerated columns ([`QualityResult`], [`FaultSeverity`]) are closed
//! enums so invalid values are rejected when a payload is parsed, before the
//! storage CHECK constraints ever see them.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;

/// Reject reason recorded when a fill cycle exceeds its time budget.
pub const REJECT_TIMEOUT: &str = "TIMEOUT";

/// Reject reason recorded when the final quality station rejects a can.
pub const REJECT_QUALITY_CHECK: &str = "QUALITY_CHECK";

/// Opaque, order-preserving diagnostic document attached to a fault.
pub type Diagnostics = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Enumerations
// =============================================================================

/// Outcome of the final quality check for a can.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum QualityResult {
    Pass,
    Fail,
}

/// Fault severity, lowest to highest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FaultSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl QualityResult {
    /// Parse a raw quality result, reporting failures as a validation error.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        raw.parse().map_err(|_| {
            StorageError::validation(
                "production_event",
                "quality_result",
                format!("'{raw}' is not one of PASS, FAIL"),
            )
        })
    }
}

impl FaultSeverity {
    /// Parse a raw severity, reporting failures as a validation error.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        raw.parse().map_err(|_| {
            StorageError::validation(
                "fault_log",
                "severity",
                format!("'{raw}' is not one of LOW, MEDIUM, HIGH, CRITICAL"),
            )
        })
    }
}

// =============================================================================
// Production Events
// =============================================================================

/// A production event ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProductionEvent {
    /// Line-assigned can identifier (not unique across runs).
    pub can_id: String,
    /// Completion time; insertion time is used when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Fill cycle duration in milliseconds.
    pub cycle_time_ms: i64,
    /// Final fill level in milliliters.
    pub fill_level_ml: f64,
    /// Whether the seal check passed.
    pub seal_verified: bool,
    /// Final quality verdict.
    pub quality_result: QualityResult,
    /// Expected when the verdict is FAIL.
    #[serde(default)]
    pub reject_reason: Option<String>,
}

impl NewProductionEvent {
    pub fn new(
        can_id: impl Into<String>,
        cycle_time_ms: i64,
        fill_level_ml: f64,
        seal_verified: bool,
        quality_result: QualityResult,
    ) -> Self {
        Self {
            can_id: can_id.into(),
            timestamp: None,
            cycle_time_ms,
            fill_level_ml,
            seal_verified,
            quality_result,
            reject_reason: None,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn with_reject_reason(mut self, reason: impl Into<String>) -> Self {
        self.reject_reason = Some(reason.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        const ENTITY: &str = "production_event";

        if self.can_id.trim().is_empty() {
            return Err(StorageError::validation(ENTITY, "can_id", "must not be empty"));
        }
        if let Some(ts) = self.timestamp {
            check_timestamp(ENTITY, "timestamp", ts)?;
        }
        if self.cycle_time_ms < 0 {
            return Err(StorageError::validation(
                ENTITY,
                "cycle_time_ms",
                format!("must be non-negative, got {}", self.cycle_time_ms),
            ));
        }
        if !self.fill_level_ml.is_finite() || self.fill_level_ml < 0.0 {
            return Err(StorageError::validation(
                ENTITY,
                "fill_level_ml",
                format!("must be a non-negative number, got {}", self.fill_level_ml),
            ));
        }

        match (self.quality_result, self.reject_reason.as_deref()) {
            (QualityResult::Fail, None) => {
                tracing::warn!(can_id = %self.can_id, "FAIL event without a reject reason");
            }
            (QualityResult::Pass, Some(reason)) => {
                tracing::warn!(can_id = %self.can_id, reason, "PASS event carries a reject reason");
            }
            _ => {}
        }

        Ok(())
    }
}

/// A stored production event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEvent {
    /// Storage-assigned surrogate id.
    pub id: i64,
    pub can_id: String,
    pub timestamp: DateTime<Utc>,
    pub cycle_time_ms: i64,
    pub fill_level_ml: f64,
    pub seal_verified: bool,
    pub quality_result: QualityResult,
    pub reject_reason: Option<String>,
}

// =============================================================================
// Fault Logs
// =============================================================================

/// A fault ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFaultLog {
    /// Producer-assigned identifier, unique across all faults.
    pub id: String,
    pub sensor_id: String,
    pub fault_type: String,
    pub severity: FaultSeverity,
    pub detected_at: DateTime<Utc>,
    /// Set when the fault was already cleared by the time it was reported.
    #[serde(default)]
    pub cleared_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub diagnostics: Option<Diagnostics>,
}

impl NewFaultLog {
    pub fn new(
        id: impl Into<String>,
        sensor_id: impl Into<String>,
        fault_type: impl Into<String>,
        severity: FaultSeverity,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sensor_id: sensor_id.into(),
            fault_type: fault_type.into(),
            severity,
            detected_at,
            cleared_at: None,
            diagnostics: None,
        }
    }

    /// Add one diagnostic entry, keeping insertion order.
    pub fn with_diagnostic(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.diagnostics
            .get_or_insert_with(Diagnostics::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_cleared_at(mut self, cleared_at: DateTime<Utc>) -> Self {
        self.cleared_at = Some(cleared_at);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        const ENTITY: &str = "fault_log";

        if self.id.trim().is_empty() {
            return Err(StorageError::validation(ENTITY, "id", "must not be empty"));
        }
        if self.sensor_id.trim().is_empty() {
            return Err(StorageError::validation(ENTITY, "sensor_id", "must not be empty"));
        }
        if self.fault_type.trim().is_empty() {
            return Err(StorageError::validation(ENTITY, "fault_type", "must not be empty"));
        }
        check_timestamp(ENTITY, "detected_at", self.detected_at)?;
        if let Some(cleared_at) = self.cleared_at {
            check_clearance(&self.id, self.detected_at, cleared_at)?;
        }
        Ok(())
    }
}

/// A stored fault log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultLog {
    pub id: String,
    pub sensor_id: String,
    pub fault_type: String,
    pub severity: FaultSeverity,
    pub detected_at: DateTime<Utc>,
    /// When the storage layer committed the row.
    pub logged_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub diagnostics: Option<Diagnostics>,
}

impl FaultLog {
    /// A fault is open until its clearance time is recorded.
    pub fn is_open(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Result of closing a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CloseOutcome {
    /// This call recorded the clearance time.
    Closed { cleared_at: DateTime<Utc> },
    /// The fault had already been cleared; the stored time is returned unchanged.
    AlreadyClosed { cleared_at: DateTime<Utc> },
}

impl CloseOutcome {
    pub fn cleared_at(&self) -> DateTime<Utc> {
        match self {
            Self::Closed { cleared_at } | Self::AlreadyClosed { cleared_at } => *cleared_at,
        }
    }
}

pub(crate) fn check_clearance(
    id: &str,
    detected_at: DateTime<Utc>,
    cleared_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    check_timestamp("fault_log", "cleared_at", cleared_at)?;
    if to_millis(cleared_at) < to_millis(detected_at) {
        return Err(StorageError::validation(
            "fault_log",
            "cleared_at",
            format!("fault '{id}' cleared at {cleared_at} before detection at {detected_at}"),
        ));
    }
    Ok(())
}

// =============================================================================
// System Metrics
// =============================================================================

/// A health snapshot ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSystemMetric {
    /// Sample time; insertion time is used when absent.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    pub cans_processed: i64,
    pub cans_passed: i64,
    pub cans_failed: i64,
    pub avg_cycle_time_ms: f64,
    /// Free-form line mode, e.g. RUNNING, STOPPED, MAINTENANCE.
    pub system_mode: String,
    pub uptime_seconds: i64,
}

impl NewSystemMetric {
    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        const ENTITY: &str = "system_metric";

        if let Some(ts) = self.recorded_at {
            check_timestamp(ENTITY, "recorded_at", ts)?;
        }
        for (field, value) in [
            ("cans_processed", self.cans_processed),
            ("cans_passed", self.cans_passed),
            ("cans_failed", self.cans_failed),
            ("uptime_seconds", self.uptime_seconds),
        ] {
            if value < 0 {
                return Err(StorageError::validation(
                    ENTITY,
                    field,
                    format!("must be non-negative, got {value}"),
                ));
            }
        }
        if !self.avg_cycle_time_ms.is_finite() || self.avg_cycle_time_ms < 0.0 {
            return Err(StorageError::validation(
                ENTITY,
                "avg_cycle_time_ms",
                format!("must be a non-negative number, got {}", self.avg_cycle_time_ms),
            ));
        }
        if self
            .cans_passed
            .checked_add(self.cans_failed)
            .is_none_or(|sum| sum > self.cans_processed)
        {
            return Err(StorageError::validation(
                ENTITY,
                "cans_processed",
                format!(
                    "passed ({}) + failed ({}) exceeds processed ({})",
                    self.cans_passed, self.cans_failed, self.cans_processed
                ),
            ));
        }
        Ok(())
    }
}

/// A stored health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetric {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub cans_processed: i64,
    pub cans_passed: i64,
    pub cans_failed: i64,
    pub avg_cycle_time_ms: f64,
    pub system_mode: String,
    pub uptime_seconds: i64,
}

// =============================================================================
// Ingestion Envelope
// =============================================================================

/// Document delivered by an upstream transport, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestPayload {
    Event(NewProductionEvent),
    Fault(NewFaultLog),
    Metric(NewSystemMetric),
    FaultCleared {
        id: String,
        cleared_at: DateTime<Utc>,
    },
}

/// What an ingested payload produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    Event { id: i64 },
    Fault { id: String },
    Metric { id: i64 },
    FaultCleared { id: String, result: CloseOutcome },
}

impl IngestPayload {
    /// Decode a JSON document; malformed input is a validation error.
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        serde_json::from_str(raw)
            .map_err(|e| StorageError::validation("payload", "body", e.to_string()))
    }
}

// =============================================================================
// Timestamp Helpers
// =============================================================================

/// Timestamps are persisted as Unix milliseconds.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// SQLite date functions only cover years 0000 through 9999.
pub(crate) fn check_timestamp(
    entity: &'static str,
    field: &'static str,
    ts: DateTime<Utc>,
) -> Result<(), StorageError> {
    if !(0..=9999).contains(&ts.year()) {
        return Err(StorageError::validation(
            entity,
            field,
            format!("{ts} is outside years 0000-9999"),
        ));
    }
    Ok(())
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    // =========================================================================
    // Enum tests
    // =========================================================================

    #[test]
    fn test_quality_result_from_str() {
        assert_eq!(QualityResult::from_str("PASS").unwrap(), QualityResult::Pass);
        assert_eq!(QualityResult::from_str("fail").unwrap(), QualityResult::Fail);
        assert!(QualityResult::from_str("MAYBE").is_err());
        assert_eq!(QualityResult::Pass.as_ref(), "PASS");
    }

    #[test]
    fn test_quality_result_parse_reports_field() {
        match QualityResult::parse("MAYBE") {
            Err(StorageError::Validation { entity, field, .. }) => {
                assert_eq!(entity, "production_event");
                assert_eq!(field, "quality_result");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!(FaultSeverity::from_str("HIGH").unwrap(), FaultSeverity::High);
        assert_eq!(
            FaultSeverity::from_str("critical").unwrap(),
            FaultSeverity::Critical
        );
        assert!(FaultSeverity::parse("FATAL").is_err());
        assert_eq!(FaultSeverity::Medium.to_string(), "MEDIUM");
        assert!(FaultSeverity::Low < FaultSeverity::Critical);
    }

    #[test]
    fn test_severity_serde_rejects_unknown() {
        let ok: FaultSeverity = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(ok, FaultSeverity::Low);
        assert!(serde_json::from_str::<FaultSeverity>("\"SEVERE\"").is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_event_validation() {
        let ok = NewProductionEvent::new("CAN1", 892, 328.0, true, QualityResult::Pass);
        assert!(ok.validate().is_ok());

        let negative_cycle = NewProductionEvent::new("CAN1", -1, 328.0, true, QualityResult::Pass);
        assert!(matches!(
            negative_cycle.validate(),
            Err(StorageError::Validation { field: "cycle_time_ms", .. })
        ));

        let negative_fill = NewProductionEvent::new("CAN1", 10, -0.5, true, QualityResult::Pass);
        assert!(matches!(
            negative_fill.validate(),
            Err(StorageError::Validation { field: "fill_level_ml", .. })
        ));

        let nan_fill = NewProductionEvent::new("CAN1", 10, f64::NAN, true, QualityResult::Pass);
        assert!(nan_fill.validate().is_err());

        let blank = NewProductionEvent::new("  ", 10, 1.0, true, QualityResult::Pass);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_fail_without_reason_is_accepted() {
        let event = NewProductionEvent::new("CAN3", 1123, 318.0, true, QualityResult::Fail);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_fault_validation_clearance_order() {
        let t0 = Utc::now();
        let fault = NewFaultLog::new("F1", "S1", "fill_timeout", FaultSeverity::High, t0)
            .with_cleared_at(t0 - Duration::milliseconds(5));
        assert!(matches!(
            fault.validate(),
            Err(StorageError::Validation { field: "cleared_at", .. })
        ));

        let same_instant =
            NewFaultLog::new("F1", "S1", "fill_timeout", FaultSeverity::High, t0).with_cleared_at(t0);
        assert!(same_instant.validate().is_ok());
    }

    #[test]
    fn test_metric_validation() {
        let mut metric = NewSystemMetric {
            recorded_at: None,
            cans_processed: 10,
            cans_passed: 7,
            cans_failed: 2,
            avg_cycle_time_ms: 950.0,
            system_mode: "RUNNING".to_string(),
            uptime_seconds: 3600,
        };
        assert!(metric.validate().is_ok());

        metric.cans_failed = 4;
        assert!(matches!(
            metric.validate(),
            Err(StorageError::Validation { field: "cans_processed", .. })
        ));

        metric.cans_failed = 0;
        metric.uptime_seconds = -1;
        assert!(matches!(
            metric.validate(),
            Err(StorageError::Validation { field: "uptime_seconds", .. })
        ));
    }

    #[test]
    fn test_metric_validation_counter_sum_overflow() {
        let metric = NewSystemMetric {
            recorded_at: None,
            cans_processed: i64::MAX,
            cans_passed: i64::MAX,
            cans_failed: 1,
            avg_cycle_time_ms: 950.0,
            system_mode: "RUNNING".to_string(),
            uptime_seconds: 0,
        };
        assert!(matches!(
            metric.validate(),
            Err(StorageError::Validation { field: "cans_processed", .. })
        ));
    }

    #[test]
    fn test_timestamps_outside_calendar_range_rejected() {
        use chrono::TimeZone;

        let far_future = Utc.with_ymd_and_hms(12000, 1, 1, 0, 0, 0).unwrap();
        let before_year_zero = Utc.with_ymd_and_hms(-1, 6, 1, 0, 0, 0).unwrap();
        let last_day = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();

        let event = NewProductionEvent::new("CAN1", 900, 330.0, true, QualityResult::Pass);
        assert!(matches!(
            event.clone().with_timestamp(far_future).validate(),
            Err(StorageError::Validation { field: "timestamp", .. })
        ));
        assert!(event.clone().with_timestamp(before_year_zero).validate().is_err());
        assert!(event.with_timestamp(last_day).validate().is_ok());

        let fault = NewFaultLog::new("F1", "S1", "jam", FaultSeverity::Low, far_future);
        assert!(matches!(
            fault.validate(),
            Err(StorageError::Validation { field: "detected_at", .. })
        ));

        let t0 = Utc::now();
        let fault = NewFaultLog::new("F1", "S1", "jam", FaultSeverity::Low, t0)
            .with_cleared_at(far_future);
        assert!(matches!(
            fault.validate(),
            Err(StorageError::Validation { field: "cleared_at", .. })
        ));

        let metric = NewSystemMetric {
            recorded_at: Some(far_future),
            cans_processed: 1,
            cans_passed: 1,
            cans_failed: 0,
            avg_cycle_time_ms: 900.0,
            system_mode: "RUNNING".to_string(),
            uptime_seconds: 1,
        };
        assert!(matches!(
            metric.validate(),
            Err(StorageError::Validation { field: "recorded_at", .. })
        ));
    }

    // =========================================================================
    // Payload tests
    // =========================================================================

    #[test]
    fn test_payload_event_defaults() {
        let payload = IngestPayload::from_json(
            r#"{"kind":"event","can_id":"CAN1","cycle_time_ms":892,"fill_level_ml":328.5,
                "seal_verified":true,"quality_result":"PASS"}"#,
        )
        .unwrap();

        match payload {
            IngestPayload::Event(event) => {
                assert_eq!(event.can_id, "CAN1");
                assert!(event.timestamp.is_none());
                assert!(event.reject_reason.is_none());
                assert_eq!(event.quality_result, QualityResult::Pass);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_payload_diagnostics_keep_order() {
        let payload = IngestPayload::from_json(
            r#"{"kind":"fault","id":"F1","sensor_id":"S1","fault_type":"pressure_drop",
                "severity":"HIGH","detected_at":"2025-01-10T08:00:00Z",
                "diagnostics":{"zeta":1,"alpha":2,"mid":{"nested":true}}}"#,
        )
        .unwrap();

        let IngestPayload::Fault(fault) = payload else {
            panic!("expected fault payload");
        };
        let keys: Vec<_> = fault.diagnostics.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_payload_rejects_bad_enum() {
        let err = IngestPayload::from_json(
            r#"{"kind":"event","can_id":"CAN1","cycle_time_ms":1,"fill_level_ml":1,
                "seal_verified":true,"quality_result":"MAYBE"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::Validation { entity: "payload", .. }));
    }

    #[test]
    fn test_millis_roundtrip_truncates_to_millis() {
        let ts = DateTime::parse_from_rfc3339("2025-01-10T08:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let back = from_millis(to_millis(ts)).unwrap();
        assert_eq!(back.timestamp_millis(), ts.timestamp_millis());
        assert_eq!(back.timestamp_subsec_millis(), 123);
    }
}
