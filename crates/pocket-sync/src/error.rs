//! # Sync Engine Error Types
//!
//! Error types for the offline queue and subscription engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │      Queue              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  RemoteRejected │  │  InvalidAction          │ │
//! │  │  ConfigLoad     │  │  RemoteTimeout  │  │  ActionNotFound         │ │
//! │  │                 │  │  RemoteOffline  │  │  ConflictUnresolved     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Storage     │  │   Subscription  │                              │
//! │  │                 │  │                 │                              │
//! │  │  StorageError   │  │  ChannelFailed  │                              │
//! │  │                 │  │  InvalidState   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync engine error type.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// The enqueued action failed validation.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Referenced action does not exist in the queue.
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// Operation requires a resolved conflict, but the conflict is still
    /// awaiting a decision.
    #[error("Conflict for action {0} is unresolved")]
    ConflictUnresolved(String),

    /// No manual-strategy conflict exists for the given action.
    #[error("No conflict recorded for action {0}")]
    ConflictNotFound(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote rejected the mutation permanently.
    #[error("Remote rejected {action_id}: {reason}")]
    RemoteRejected { action_id: String, reason: String },

    /// Remote call exceeded the configured timeout.
    #[error("Remote call timed out after {0} ms")]
    RemoteTimeout(u64),

    /// Remote is unreachable.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    // =========================================================================
    // Subscription Errors
    // =========================================================================
    /// A channel could not be opened.
    #[error("Channel {channel_id} failed: {reason}")]
    ChannelFailed { channel_id: String, reason: String },

    /// Connection state machine rejected a transition.
    #[error("Invalid connection transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persistent store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Command channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<pocket_store::StoreError> for SyncError {
    fn from(err: pocket_store::StoreError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidAction(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation may succeed on a later attempt.
    ///
    /// ## Retryable
    /// - Remote unavailability and timeouts
    /// - Transient storage failures
    ///
    /// ## Non-Retryable
    /// - Validation and configuration errors
    /// - Permanent remote rejections
    /// - Unresolved conflicts (they wait on a decision, not on time)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteTimeout(_)
                | SyncError::RemoteUnavailable(_)
                | SyncError::ChannelFailed { .. }
                | SyncError::Storage(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::RemoteTimeout(10_000).is_retryable());
        assert!(SyncError::RemoteUnavailable("dns".into()).is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::ConflictUnresolved("a1".into()).is_retryable());
        assert!(!SyncError::RemoteRejected {
            action_id: "a1".into(),
            reason: "schema".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::RemoteRejected {
            action_id: "0190-abc".into(),
            reason: "unknown target".into(),
        };
        assert!(err.to_string().contains("0190-abc"));
        assert!(err.to_string().contains("unknown target"));
    }
}
