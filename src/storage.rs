//! Storage Layer
//!
//! Durable SQLite storage with async read/write separation:
//! - **Writer**: Async task with exclusive writes using tokio mpsc channel;
//!   every write is acknowledged only after it commits
//! - **Reader**: Connection pool for concurrent reads
//!
//! # Components
//!
//! - [`StorageWriter`]: Append events, faults and metrics; close faults; ingest JSON
//! - [`EventReader`] / [`FaultReader`] / [`MetricReader`]: Filtered record reads
//! - [`AggregateReader`]: Daily summary, performance stats, fault analysis
//! - [`QueryService`]: Dashboard-style reads
//! - [`StorageAdmin`]: Retention trims and maintenance
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod actor;
mod aggregates;
mod builder;
pub mod db;
mod error;
mod facades;
mod rows;
pub mod schema;
mod types;

pub use aggregates::{
    AggregateReader, FaultAnalysis, PerformanceStats, ProductionSummary, RejectBreakdown,
};
pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use facades::{
    DEFAULT_LIMIT, EventQuery, EventReader, FaultQuery, FaultReader, MAX_LIMIT, MetricQuery,
    MetricReader, QueryService, SortOrder, StorageAdmin, StorageWriter,
};
pub use types::{
    CloseOutcome, Diagnostics, FaultLog, FaultSeverity, IngestOutcome, IngestPayload,
    NewFaultLog, NewProductionEvent, NewSystemMetric, ProductionEvent, QualityResult,
    REJECT_QUALITY_CHECK, REJECT_TIMEOUT, SystemMetric,
};
