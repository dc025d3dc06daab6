//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause. Caller mistakes
//! ([`Validation`](StorageError::Validation),
//! [`Conflict`](StorageError::Conflict), [`NotFound`](StorageError::NotFound))
//! carry the entity kind and the offending field or identifier; backend
//! failures are surfaced unchanged and never retried by the storage layer.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Malformed input: unknown enum value, negative number, clearance
    /// before detection, undecodable payload. Nothing was written.
    #[error("invalid {entity}.{field}: {message}")]
    Validation {
        entity: &'static str,
        field: &'static str,
        message: String,
    },

    /// A caller-assigned identifier is already taken.
    #[error("{entity} '{id}' already exists")]
    Conflict { entity: &'static str, id: String },

    /// The addressed row does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// Writer actor went away before replying.
    #[error("writer actor dropped the reply channel")]
    ChannelClosed,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid data in database (e.g., unknown enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub(crate) fn validation(
        entity: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            entity,
            field,
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller's input rather than the backend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Conflict { .. } | Self::NotFound { .. }
        )
    }

    /// Map constraint violations raised by SQLite to the semantic variants.
    ///
    /// Unique violations become [`Conflict`](Self::Conflict) and CHECK
    /// violations become [`Validation`](Self::Validation); anything else stays
    /// a [`Database`](Self::Database) error.
    pub(crate) fn from_constraint(err: sqlx::Error, entity: &'static str, id: &str) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.is_unique_violation() {
                return Self::Conflict {
                    entity,
                    id: id.to_string(),
                };
            }
            if db.is_check_violation() {
                return Self::Validation {
                    entity,
                    field: "row",
                    message: db.message().to_string(),
                };
            }
        }
        Self::Database(err)
    }
}
