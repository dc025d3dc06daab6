//! Canline - production line record store
//!
//! Durable storage and query layer for a can-filling line. Three record
//! streams are kept in a single SQLite database:
//!
//! - **Production events**: one row per can, with cycle time, fill level,
//!   seal check and quality outcome
//! - **Fault logs**: sensor faults keyed by a producer-assigned id, later
//!   closed with a clearance time
//! - **System metrics**: periodic health snapshots of the line
//!
//! Derived views (daily summary, performance statistics, fault analysis)
//! are computed from current table contents on every read.
//!
//! # Example
//!
//! ```rust,ignore
//! use canline::{NewProductionEvent, QualityResult, StorageBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), canline::StorageError> {
//!     let storage = StorageBuilder::new("sqlite:data/canline.db").build().await?;
//!
//!     let event = NewProductionEvent::new("CAN001", 892, 328.0, true, QualityResult::Pass);
//!     storage.writer.append_event(event).await?;
//!
//!     for day in storage.query.get_summary().await? {
//!         println!("{}: {}% pass", day.date, day.pass_rate_pct);
//!     }
//!
//!     storage.shutdown().await
//! }
//! ```

pub mod config;
pub mod storage;

pub use config::{AppConfig, ConfigError};
pub use storage::{
    AggregateReader, CloseOutcome, EventQuery, EventReader, FaultAnalysis, FaultLog, FaultQuery,
    FaultReader, FaultSeverity, IngestOutcome, IngestPayload, MetricQuery, MetricReader,
    NewFaultLog, NewProductionEvent, NewSystemMetric, PerformanceStats, ProductionEvent,
    ProductionSummary, QualityResult, QueryService, RejectBreakdown, SortOrder, StorageAdmin,
    StorageBuilder, StorageError, StorageHandles, StorageWriter, SystemMetric,
};
