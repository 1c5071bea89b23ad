//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     POCKET_MAX_RETRIES=5                                               │
//! │     POCKET_CONFLICT_STRATEGY=server-wins                               │
//! │                                                                         │
//! │  2. TOML Config File (host-supplied path)                              │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [queue]
//! max_retries = 3
//! retry_base_delay_ms = 1000
//! max_retry_delay_ms = 30000
//! batch_size = 10
//! remote_timeout_ms = 10000
//!
//! [conflict]
//! strategy = "last-write-wins"
//!
//! [conflict.merge_fields]
//! notes = ["body", "tags"]
//!
//! [channels]
//! reconnect_ceiling = 5
//! flush_interval_ms = 100
//!
//! [store]
//! path = "pocket-sync.db"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use pocket_core::resolver::ConflictStrategy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Queue Settings
// =============================================================================

/// Offline queue behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Remote attempts per action before it is marked Failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for attempt scheduling (milliseconds). The delay before
    /// the Nth retry is `base * 2^(N-1)`, capped at `max_retry_delay_ms`.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Ceiling for the retry delay (milliseconds).
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Actions processed per drain batch. Batches run sequentially;
    /// actions within a batch may be issued concurrently.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Timeout for a single remote mutation call (milliseconds). A timed
    /// out call counts as a transient failure.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1_000
}
fn default_max_retry_delay() -> u64 {
    30_000
}
fn default_batch_size() -> u32 {
    10
}
fn default_remote_timeout() -> u64 {
    10_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            batch_size: default_batch_size(),
            remote_timeout_ms: default_remote_timeout(),
        }
    }
}

// =============================================================================
// Conflict Settings
// =============================================================================

/// Conflict handling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictSettings {
    /// Default resolution strategy for detected conflicts.
    #[serde(default)]
    pub strategy: ConflictStrategy,

    /// Per-target allow-lists for the merge-fields strategy: the named
    /// local fields overwrite remote values, everything else stays remote.
    /// A target with no entry merges nothing (remote wins wholesale).
    #[serde(default)]
    pub merge_fields: HashMap<String, Vec<String>>,
}

// =============================================================================
// Channel Settings
// =============================================================================

/// Subscription channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Reconnect attempts per outage before a channel goes Errored and
    /// waits for an explicit trigger. 0 means retry forever.
    #[serde(default = "default_reconnect_ceiling")]
    pub reconnect_ceiling: u32,

    /// Batching window for delivering received change events to the host
    /// callback (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

fn default_reconnect_ceiling() -> u32 {
    5
}
fn default_flush_interval() -> u64 {
    100
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            reconnect_ceiling: default_reconnect_ceiling(),
            flush_interval_ms: default_flush_interval(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pocket-sync.db")
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            path: default_store_path(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Offline queue behavior.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Conflict handling.
    #[serde(default)]
    pub conflict: ConflictSettings,

    /// Subscription channels.
    #[serde(default)]
    pub channels: ChannelSettings,

    /// Persistent store.
    #[serde(default)]
    pub store: StoreSettings,
}

impl SyncConfig {
    /// Creates a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (TOML), if a path is given and the file exists
    /// 3. Environment variables (POCKET_*)
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if the load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.queue.retry_base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "retry_base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.queue.max_retry_delay_ms < self.queue.retry_base_delay_ms {
            return Err(SyncError::InvalidConfig(
                "max_retry_delay_ms must be at least retry_base_delay_ms".into(),
            ));
        }

        if self.conflict.strategy == ConflictStrategy::MergeFields
            && self.conflict.merge_fields.values().all(Vec::is_empty)
        {
            return Err(SyncError::InvalidConfig(
                "merge-fields strategy needs at least one allow-listed field".into(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("store path must not be empty".into()));
        }

        Ok(())
    }

    /// Applies POCKET_* environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("POCKET_MAX_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                debug!(max_retries = n, "Overriding max_retries from environment");
                self.queue.max_retries = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_BATCH_SIZE") {
            if let Ok(n) = v.parse::<u32>() {
                self.queue.batch_size = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_RETRY_BASE_DELAY_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.queue.retry_base_delay_ms = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_MAX_RETRY_DELAY_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.queue.max_retry_delay_ms = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_REMOTE_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.queue.remote_timeout_ms = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_CONFLICT_STRATEGY") {
            match v.parse::<ConflictStrategy>() {
                Ok(parsed) => {
                    debug!(strategy = %v, "Overriding conflict strategy from environment");
                    self.conflict.strategy = parsed;
                }
                Err(_) => warn!(strategy = %v, "Unknown conflict strategy in environment"),
            }
        }

        if let Ok(v) = std::env::var("POCKET_RECONNECT_CEILING") {
            if let Ok(n) = v.parse::<u32>() {
                self.channels.reconnect_ceiling = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_FLUSH_INTERVAL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.channels.flush_interval_ms = n;
            }
        }

        if let Ok(v) = std::env::var("POCKET_STORE_PATH") {
            debug!(path = %v, "Overriding store path from environment");
            self.store.path = PathBuf::from(v);
        }
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Merge allow-list for a target, empty when none is configured.
    pub fn merge_fields_for(&self, target: &str) -> &[String] {
        self.conflict
            .merge_fields
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
