//! # Status & Diagnostics
//!
//! Read-side views over the engine: the single aggregated sync status a
//! host surfaces in its UI, and a fuller diagnostics snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pocket_core::status::{aggregate_status, SyncStatus};
use pocket_core::types::{ChannelStatus, ConnectionState};

use crate::error::SyncResult;
use crate::queue::OfflineActionQueue;
use crate::subscription::SubscriptionHandle;

/// Point-in-time engine diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Aggregated status, in priority order:
    /// Conflicts > Error > Syncing > Offline > Synced.
    pub status: SyncStatus,

    pub connection: ConnectionState,
    pub pending: u64,
    pub in_flight: u64,
    pub failed: u64,
    pub unresolved_conflicts: u64,
    pub reconnect_attempts: u32,
    pub channels: Vec<(String, ChannelStatus)>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Collects a diagnostics snapshot from the queue and the subscription
/// manager. Counts are read independently, so a snapshot taken during a
/// drain is approximate.
pub async fn collect_diagnostics(
    queue: &OfflineActionQueue,
    subscriptions: &SubscriptionHandle,
    last_sync_time: Option<DateTime<Utc>>,
) -> SyncResult<Diagnostics> {
    let pending = queue.pending_count().await?;
    let in_flight = queue.in_flight_count().await?;
    let failed = queue.failed_count().await?;
    let unresolved_conflicts = queue.conflict_count().await?;

    let snapshot = subscriptions.snapshot().await?;
    let draining = queue.is_draining() || in_flight > 0;

    let status = aggregate_status(
        pending + in_flight,
        unresolved_conflicts,
        failed,
        draining,
        snapshot.connection,
    );

    Ok(Diagnostics {
        status,
        connection: snapshot.connection,
        pending,
        in_flight,
        failed,
        unresolved_conflicts,
        reconnect_attempts: snapshot.reconnect_attempts,
        channels: snapshot.channels,
        last_sync_time,
    })
}
