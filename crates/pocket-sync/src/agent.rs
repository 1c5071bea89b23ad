//! # Sync Agent
//!
//! The facade hosts embed. Owns the store, the offline queue, the
//! subscription manager, and the connectivity signal, and wires them
//! together.
//!
//! ## Component Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SyncAgent                                    │
//! │                                                                         │
//! │  set_reachable(true) ──► ConnectivityMonitor ──┬─► drain trigger task   │
//! │                                                │      │                 │
//! │                                                │      ▼                 │
//! │  enqueue() ───────────► OfflineActionQueue ◄───┘  process_queue()       │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  subscribe() ─────────► SubscriptionManager (task)                      │
//! │                               │                                         │
//! │  diagnostics() ◄──── queue counts + manager snapshot                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use pocket_core::status::SyncStatus;
use pocket_core::types::{ActionKind, ActionRecord, ConflictRecord, ConnectionState};
use pocket_store::{Store, StoreConfig};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::monitor::{connectivity_channel, ConnectivityHandle};
use crate::queue::{DrainSummary, OfflineActionQueue};
use crate::remote::{ChannelTransport, RemoteStore};
use crate::status::{collect_diagnostics, Diagnostics};
use crate::subscription::{ChangeCallback, SubscriptionHandle, SubscriptionManager};

/// The embeddable sync engine.
///
/// One agent per database. All methods take `&self`; the agent is made to
/// be held in an `Arc` and shared across the host.
pub struct SyncAgent {
    store: Store,
    queue: Arc<OfflineActionQueue>,
    subscriptions: SubscriptionHandle,
    connectivity: ConnectivityHandle,

    manager_task: JoinHandle<()>,
    drain_trigger_task: JoinHandle<()>,
}

impl SyncAgent {
    /// Builds and starts the agent: opens the store, spawns the
    /// subscription manager, and arms the reachability-driven drain
    /// trigger. The device starts Offline until the host reports
    /// reachability.
    pub async fn start(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn ChannelTransport>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        info!("Starting sync agent");
        let store = Store::open(StoreConfig::new(&config.store.path)).await?;

        let (connectivity, reachability) = connectivity_channel();

        let queue = Arc::new(OfflineActionQueue::new(
            store.clone(),
            remote,
            Arc::clone(&config),
            reachability.clone(),
        ));

        let (manager, subscriptions) =
            SubscriptionManager::new(transport, Arc::clone(&config), reachability);
        let manager_task = tokio::spawn(manager.run());

        // Becoming reachable drains whatever queued up while offline.
        let drain_trigger_task = {
            let queue = Arc::clone(&queue);
            let mut rx = connectivity.subscribe();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        info!("Back online, draining queue");
                        if let Err(e) = queue.process_queue().await {
                            error!(error = %e, "Reachability-triggered drain failed");
                        }
                    }
                }
            })
        };

        Ok(SyncAgent {
            store,
            queue,
            subscriptions,
            connectivity,
            manager_task,
            drain_trigger_task,
        })
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Reports a reachability change from the host's network monitoring.
    pub fn set_reachable(&self, reachable: bool) {
        self.connectivity.set_reachable(reachable);
    }

    /// Current host-reported reachability.
    pub fn is_reachable(&self) -> bool {
        self.connectivity.is_reachable()
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Queues a mutation. Always local; returns once the action is
    /// durable.
    pub async fn enqueue(
        &self,
        kind: ActionKind,
        target: &str,
        payload: Value,
        original_payload: Option<Value>,
        owner: &str,
    ) -> SyncResult<ActionRecord> {
        self.queue
            .enqueue(kind, target, payload, original_payload, owner)
            .await
    }

    /// Drains the queue now. No-op while offline or already draining.
    pub async fn process_queue(&self) -> SyncResult<DrainSummary> {
        self.queue.process_queue().await
    }

    /// Conflicts awaiting a caller decision.
    pub async fn list_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.queue.list_conflicts().await
    }

    /// Applies a decision to a recorded conflict.
    pub async fn resolve_conflict(&self, action_id: &str, resolution: Value) -> SyncResult<()> {
        self.queue.resolve_conflict(action_id, resolution).await
    }

    /// Permanently failed actions.
    pub async fn list_failed(&self) -> SyncResult<Vec<ActionRecord>> {
        self.queue.list_failed().await
    }

    /// Drops a failed action for good.
    pub async fn discard_failed(&self, action_id: &str) -> SyncResult<()> {
        self.queue.discard_failed(action_id).await
    }

    /// Gives a failed action a fresh attempt budget.
    pub async fn re_enqueue_failed(&self, action_id: &str) -> SyncResult<()> {
        self.queue.re_enqueue_failed(action_id).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Registers a realtime channel and returns its generated id. The
    /// optional `filter` scopes the feed server-side, for example to one
    /// owner's records.
    pub async fn subscribe(
        &self,
        target: impl Into<String>,
        filter: Option<String>,
        callback: ChangeCallback,
    ) -> SyncResult<String> {
        self.subscriptions.subscribe(target, filter, callback).await
    }

    /// Closes and forgets a channel.
    pub async fn unsubscribe(&self, channel_id: &str) -> SyncResult<()> {
        self.subscriptions.unsubscribe(channel_id).await
    }

    /// Closes and forgets every channel.
    pub async fn unsubscribe_all(&self) -> SyncResult<()> {
        self.subscriptions.unsubscribe_all().await
    }

    /// Skips any backoff in progress and reconnects now.
    pub async fn force_reconnect(&self) -> SyncResult<()> {
        self.subscriptions.force_reconnect().await
    }

    /// App lifecycle: background closes channels without forgetting them.
    pub async fn set_background(&self) -> SyncResult<()> {
        self.subscriptions.set_background().await
    }

    /// App lifecycle: foreground reopens registered channels.
    pub async fn set_foreground(&self) -> SyncResult<()> {
        self.subscriptions.set_foreground().await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.subscriptions.connection_state()
    }

    /// Current aggregate status, folded from live queue counts and the
    /// connection state.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(self.diagnostics().await?.status)
    }

    /// Full diagnostics snapshot (counts are approximate during a drain).
    pub async fn diagnostics(&self) -> SyncResult<Diagnostics> {
        let last_sync_time = self.store.metadata().last_sync_time().await?;
        collect_diagnostics(&self.queue, &self.subscriptions, last_sync_time).await
    }

    /// Graceful shutdown: stops the manager and background tasks and
    /// flushes the store. Queued actions stay durable for the next start.
    pub async fn shutdown(self) {
        info!("Sync agent shutting down");
        let _ = self.subscriptions.shutdown().await;
        let _ = self.manager_task.await;
        self.drain_trigger_task.abort();
        self.store.close().await;
        info!("Sync agent stopped");
    }
}
