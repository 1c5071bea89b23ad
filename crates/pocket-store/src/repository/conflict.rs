//! Conflict record repository.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use pocket_core::types::ConflictRecord;

use crate::error::{StoreError, StoreResult};
use crate::repository::{datetime_from_millis, millis_from_datetime};

/// Typed access to the `conflicts` table. One row per conflicted action;
/// deleting the action cascades the conflict away.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    /// Records a detected conflict. Replaces any earlier row for the same
    /// action so re-detection after a partial resolution stays current.
    pub async fn insert(&self, record: &ConflictRecord) -> StoreResult<()> {
        let local = serde_json::to_string(&record.local_payload)
            .map_err(|e| StoreError::CorruptRow(format!("local_payload encode: {e}")))?;
        let remote = serde_json::to_string(&record.remote_payload)
            .map_err(|e| StoreError::CorruptRow(format!("remote_payload encode: {e}")))?;
        let resolution = record
            .resolution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::CorruptRow(format!("resolution encode: {e}")))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO conflicts
                (action_id, target, local_payload, remote_payload, detected_at, resolved, resolution)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.action_id)
        .bind(&record.target)
        .bind(local)
        .bind(remote)
        .bind(millis_from_datetime(record.detected_at))
        .bind(record.resolved as i64)
        .bind(resolution)
        .execute(&self.pool)
        .await?;

        debug!(action_id = %record.action_id, target = %record.target, "Conflict recorded");
        Ok(())
    }

    /// Fetches the conflict attached to an action, if any.
    pub async fn get(&self, action_id: &str) -> StoreResult<Option<ConflictRecord>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE action_id = ?")
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_conflict(&r)).transpose()
    }

    /// Lists conflicts still awaiting a decision, oldest first.
    pub async fn list_unresolved(&self) -> StoreResult<Vec<ConflictRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE resolved = 0 ORDER BY detected_at ASC, action_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_conflict).collect()
    }

    /// Counts conflicts still awaiting a decision.
    pub async fn count_unresolved(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM conflicts WHERE resolved = 0")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Stores the applied resolution for a conflict.
    pub async fn mark_resolved(&self, action_id: &str, resolution: &serde_json::Value) -> StoreResult<()> {
        let encoded = serde_json::to_string(resolution)
            .map_err(|e| StoreError::CorruptRow(format!("resolution encode: {e}")))?;

        let result = sqlx::query(
            "UPDATE conflicts SET resolved = 1, resolution = ? WHERE action_id = ? AND resolved = 0",
        )
        .bind(encoded)
        .bind(action_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "unresolved conflict",
                id: action_id.to_string(),
            });
        }
        Ok(())
    }

    /// Removes a conflict row directly (the usual path is the cascade from
    /// deleting its action).
    pub async fn delete(&self, action_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM conflicts WHERE action_id = ?")
            .bind(action_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_conflict(row: &SqliteRow) -> StoreResult<ConflictRecord> {
    let local_raw: String = row.try_get("local_payload")?;
    let local_payload = serde_json::from_str(&local_raw)
        .map_err(|e| StoreError::CorruptRow(format!("local_payload decode: {e}")))?;

    let remote_raw: String = row.try_get("remote_payload")?;
    let remote_payload = serde_json::from_str(&remote_raw)
        .map_err(|e| StoreError::CorruptRow(format!("remote_payload decode: {e}")))?;

    let resolution_raw: Option<String> = row.try_get("resolution")?;
    let resolution = resolution_raw
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::CorruptRow(format!("resolution decode: {e}")))?;

    let detected_ms: i64 = row.try_get("detected_at")?;
    let resolved: i64 = row.try_get("resolved")?;

    Ok(ConflictRecord {
        action_id: row.try_get("action_id")?,
        target: row.try_get("target")?,
        local_payload,
        remote_payload,
        detected_at: datetime_from_millis(detected_ms)?,
        resolved: resolved != 0,
        resolution,
    })
}
