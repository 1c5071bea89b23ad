//! # Sync Status Aggregation
//!
//! Folds queue and subscription state into the single status enum callers
//! consume. When several conditions hold at once the priority is
//! `Conflicts > Error > Syncing > Offline > Synced`.

use serde::{Deserialize, Serialize};

use crate::types::ConnectionState;

/// Aggregate sync status for external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No pending work, no conflicts, connection Online.
    Synced,
    /// A drain is running, or pending work exists while connected or
    /// reconnecting.
    Syncing,
    /// Connection state is Offline.
    Offline,
    /// One or more unresolved Conflict Records exist.
    Conflicts,
    /// Failed actions exist (and no conflicts are pending).
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::Conflicts => write!(f, "conflicts"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Computes the aggregate status from live counts and connection state.
///
/// Pending work while Online (drain about to pick it up) also reports
/// Syncing: the queue is not in sync yet, and Synced must only be reported
/// when nothing is outstanding.
pub fn aggregate_status(
    pending_actions: u64,
    unresolved_conflicts: u64,
    failed_actions: u64,
    drain_active: bool,
    connection: ConnectionState,
) -> SyncStatus {
    if unresolved_conflicts > 0 {
        return SyncStatus::Conflicts;
    }
    if failed_actions > 0 {
        return SyncStatus::Error;
    }
    let reconnecting = matches!(
        connection,
        ConnectionState::Connecting | ConnectionState::Reconnecting
    );
    if drain_active || (pending_actions > 0 && (reconnecting || connection == ConnectionState::Online)) {
        return SyncStatus::Syncing;
    }
    if connection == ConnectionState::Offline {
        return SyncStatus::Offline;
    }
    if pending_actions == 0 && connection == ConnectionState::Online {
        return SyncStatus::Synced;
    }
    // Connecting/Reconnecting with nothing queued: not offline, not synced.
    SyncStatus::Syncing
}
