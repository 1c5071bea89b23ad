//! # Store Pool Management
//!
//! Connection pool creation and configuration for the SQLite-backed
//! persistent queue store.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  StoreConfig::new(path) ← configure pool settings                   │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  Store::open(config).await                                          │
//! │       │  1. open/create database file (WAL, foreign keys)           │
//! │       │  2. run embedded migrations                                 │
//! │       │  3. recover: any InFlight rows left by a crash → Pending    │
//! │       ▼                                                             │
//! │  Store handle → actions() / conflicts() / metadata()                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! WAL keeps readers and the single logical writer from blocking each
//! other, and improves crash recovery: a mutation acknowledged to the
//! caller survives a process kill.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::repository::action::ActionRepository;
use crate::repository::conflict::ConflictRepository;
use crate::repository::metadata::MetadataRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Persistent queue store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of pooled connections.
    /// Default: 4 (one writer plus readers for status queries).
    pub max_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Whether to run migrations on open. Default: true.
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a configuration for the given database path. The file is
    /// created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of pooled connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Creates an in-memory configuration (for tests).
    ///
    /// In-memory databases are per-connection, so the pool is pinned to a
    /// single connection.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the persistent queue store, providing repository access.
///
/// Cheap to clone; all clones share one pool. The store is the single
/// source of truth for queue state; every lifecycle transition is written
/// through before control returns to the caller.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens the store: builds the pool, runs migrations, and recovers
    /// actions stranded InFlight by a previous crash back to Pending.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening persistent queue store"
        );

        let connect_options = if config.database_path == PathBuf::from(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true)
        };

        debug!("Store connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Store { pool };

        if config.run_migrations {
            migrations::run_migrations(&store.pool).await?;
        }

        // A drain interrupted mid-flight leaves InFlight rows behind; they
        // were never acknowledged remotely, so they go back to Pending.
        let recovered = store.actions().recover_in_flight().await?;
        if recovered > 0 {
            info!(recovered, "Recovered in-flight actions from previous run");
        }

        info!("Persistent queue store ready");
        Ok(store)
    }

    /// Action repository (the pending-action log).
    pub fn actions(&self) -> ActionRepository {
        ActionRepository::new(self.pool.clone())
    }

    /// Conflict repository.
    pub fn conflicts(&self) -> ConflictRepository {
        ConflictRepository::new(self.pool.clone())
    }

    /// Metadata repository (singleton row).
    pub fn metadata(&self) -> MetadataRepository {
        MetadataRepository::new(self.pool.clone())
    }

    /// Direct pool access for diagnostics.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool, flushing WAL state.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
