//! # Store Migrations
//!
//! Embedded SQL migrations for the persistent queue store.
//!
//! The `sqlx::migrate!()` macro embeds every file from `migrations/sqlite`
//! into the binary at compile time; `run_migrations` applies pending ones in
//! filename order and records them in `_sqlx_migrations`. Idempotent and
//! transactional, safe to run on every startup, and it MUST run before the
//! `Store` handle is given out (no API call is served from an unmigrated
//! database).

use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    info!("Checking for pending store migrations");

    MIGRATOR.run(pool).await?;

    info!("Store schema up to date");
    Ok(())
}

/// Returns (total embedded, applied) migration counts, for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> StoreResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
