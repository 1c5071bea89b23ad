//! # Store Error Types
//!
//! Errors from the persistent queue store. A failed durable write is fatal
//! to the triggering call only: it surfaces immediately instead of silently
//! dropping a mutation.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent queue store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database file could not be opened or the pool could not be built.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed.
    #[error("Store migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Store query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A persisted row could not be decoded back into its record type.
    /// Indicates on-disk corruption or a schema/version mismatch.
    #[error("Corrupt store row: {0}")]
    CorruptRow(String),

    /// Row lookup by key found nothing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
