//! Sync metadata repository (singleton row).

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::StoreResult;
use crate::repository::{datetime_from_millis, millis_from_datetime};

/// Typed access to the `metadata` singleton row.
#[derive(Debug, Clone)]
pub struct MetadataRepository {
    pool: SqlitePool,
}

impl MetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetadataRepository { pool }
    }

    /// Timestamp of the last drain that fully succeeded, if any.
    pub async fn last_sync_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_sync_time FROM metadata WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let ms: Option<i64> = row.try_get("last_sync_time")?;
        ms.map(datetime_from_millis).transpose()
    }

    /// Records a fully successful drain.
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE metadata SET last_sync_time = ? WHERE id = 1")
            .bind(millis_from_datetime(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
