//! Pending-action log repository.
//!
//! Rows are keyed by UUIDv7 ids, so `ORDER BY id ASC` is creation order
//! and the drain loop reads the queue front with a plain index scan.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

use pocket_core::types::{ActionKind, ActionRecord, ActionState};

use crate::error::{StoreError, StoreResult};
use crate::repository::{datetime_from_millis, millis_from_datetime};

/// Typed access to the `actions` table.
#[derive(Debug, Clone)]
pub struct ActionRepository {
    pool: SqlitePool,
}

impl ActionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ActionRepository { pool }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persists a newly enqueued action. The caller acknowledges the
    /// mutation only after this returns.
    pub async fn insert(&self, record: &ActionRecord) -> StoreResult<()> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::CorruptRow(format!("payload encode: {e}")))?;
        let original = record
            .original_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::CorruptRow(format!("original_payload encode: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO actions
                (id, kind, target, payload, original_payload, owner,
                 created_at, attempts, attempt_limit, state, last_error, next_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.to_string())
        .bind(&record.target)
        .bind(payload)
        .bind(original)
        .bind(&record.owner)
        .bind(millis_from_datetime(record.created_at))
        .bind(record.attempts as i64)
        .bind(record.attempt_limit as i64)
        .bind(record.state.to_string())
        .bind(&record.last_error)
        .bind(record.next_attempt_at.map(millis_from_datetime))
        .execute(&self.pool)
        .await?;

        debug!(action_id = %record.id, target = %record.target, "Action persisted");
        Ok(())
    }

    /// Marks an action as handed to the remote. Guarded on the current
    /// state so a concurrent resolution cannot be clobbered.
    pub async fn mark_in_flight(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE actions SET state = 'in_flight' WHERE id = ? AND state = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "pending action",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Records a retryable failure: bumps the attempt count, stores the
    /// error text, and schedules the next attempt.
    pub async fn mark_pending_retry(
        &self,
        id: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET state = 'pending', attempts = ?, next_attempt_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(millis_from_datetime(next_attempt_at))
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "action",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Marks an action permanently failed after its attempt budget is
    /// spent or a permanent remote rejection.
    pub async fn mark_failed(&self, id: &str, attempts: u32, last_error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET state = 'failed', attempts = ?, next_attempt_at = NULL, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "action",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Returns an in-flight action to the queue without consuming an
    /// attempt (used when a drain is aborted before the remote call).
    pub async fn return_to_pending(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE actions SET state = 'pending' WHERE id = ? AND state = 'in_flight'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resets a failed action for another round of attempts.
    pub async fn reset_for_retry(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET state = 'pending', attempts = 0, next_attempt_at = NULL, last_error = NULL
            WHERE id = ? AND state = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "failed action",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Removes a completed (or discarded) action. Cascades to any
    /// conflict row attached to it.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM actions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns stranded in-flight rows to Pending. Run once at startup;
    /// those actions were never acknowledged by the remote.
    pub async fn recover_in_flight(&self) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE actions SET state = 'pending' WHERE state = 'in_flight'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches a single action by id.
    pub async fn get(&self, id: &str) -> StoreResult<Option<ActionRecord>> {
        let row = sqlx::query("SELECT * FROM actions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_action(&r)).transpose()
    }

    /// Returns the queue front: pending actions whose retry delay has
    /// elapsed, oldest first, capped at `limit`.
    ///
    /// Actions with an unresolved conflict row are held back so a drain
    /// does not re-submit a change that is waiting on a decision.
    pub async fn list_eligible(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<ActionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT a.* FROM actions a
            WHERE a.state = 'pending'
              AND (a.next_attempt_at IS NULL OR a.next_attempt_at <= ?)
              AND NOT EXISTS (
                  SELECT 1 FROM conflicts c
                  WHERE c.action_id = a.id AND c.resolved = 0
              )
            ORDER BY a.id ASC
            LIMIT ?
            "#,
        )
        .bind(millis_from_datetime(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_action).collect()
    }

    /// Lists permanently failed actions, oldest first.
    pub async fn list_failed(&self) -> StoreResult<Vec<ActionRecord>> {
        let rows = sqlx::query("SELECT * FROM actions WHERE state = 'failed' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_action).collect()
    }

    /// Lists every queued action, oldest first (diagnostics).
    pub async fn list_all(&self) -> StoreResult<Vec<ActionRecord>> {
        let rows = sqlx::query("SELECT * FROM actions ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_action).collect()
    }

    /// Counts actions in the given state.
    pub async fn count_by_state(&self, state: ActionState) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM actions WHERE state = ?")
            .bind(state.to_string())
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}

/// Maps an `actions` row back to the in-memory record.
fn decode_action(row: &SqliteRow) -> StoreResult<ActionRecord> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ActionKind::from_str(&kind_raw)
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;

    let state_raw: String = row.try_get("state")?;
    let state = ActionState::from_str(&state_raw)
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;

    let payload_raw: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|e| StoreError::CorruptRow(format!("payload decode: {e}")))?;

    let original_raw: Option<String> = row.try_get("original_payload")?;
    let original_payload = original_raw
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::CorruptRow(format!("original_payload decode: {e}")))?;

    let created_ms: i64 = row.try_get("created_at")?;
    let next_ms: Option<i64> = row.try_get("next_attempt_at")?;
    let attempts: i64 = row.try_get("attempts")?;
    let attempt_limit: i64 = row.try_get("attempt_limit")?;

    Ok(ActionRecord {
        id: row.try_get("id")?,
        kind,
        target: row.try_get("target")?,
        payload,
        original_payload,
        owner: row.try_get("owner")?,
        created_at: datetime_from_millis(created_ms)?,
        attempts: attempts as u32,
        attempt_limit: attempt_limit as u32,
        state,
        last_error: row.try_get("last_error")?,
        next_attempt_at: next_ms.map(datetime_from_millis).transpose()?,
    })
}
