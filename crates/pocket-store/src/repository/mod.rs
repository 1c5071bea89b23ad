//! Repository layer: typed access to the queue tables.
//!
//! Each repository owns a pool clone and maps rows to `pocket-core` types
//! by hand. Timestamps are stored as INTEGER epoch milliseconds so that
//! eligibility comparisons in SQL are exact.

pub mod action;
pub mod conflict;
pub mod metadata;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{StoreError, StoreResult};

/// Converts a stored epoch-milliseconds value back to a UTC timestamp.
pub(crate) fn datetime_from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::CorruptRow(format!("timestamp out of range: {ms}")))
}

/// Converts a UTC timestamp to the stored epoch-milliseconds form.
pub(crate) fn millis_from_datetime(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
