//! # Connectivity Monitor
//!
//! Reachability signal shared by the drain loop and the subscription
//! manager. The engine never inspects the network itself; the host feeds in
//! reachability changes (from its platform's network APIs) and every
//! interested task observes them through a watch channel.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  host platform ──► ConnectivityHandle::set_reachable(bool)              │
//! │                              │                                          │
//! │                      watch::Sender<bool>                                │
//! │                     ╱                ╲                                  │
//! │   OfflineActionQueue (drain gate)   SubscriptionManager (reconnects)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::watch;
use tracing::info;

/// Host-facing side of the reachability signal.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Reports a reachability change. Repeated reports of the same value
    /// are absorbed without waking observers.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!(reachable, "Reachability changed");
        }
    }

    /// Current reachability.
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// A fresh observer of the signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Creates the reachability signal. Engines start offline until the host
/// reports otherwise.
pub fn connectivity_channel() -> (ConnectivityHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (ConnectivityHandle { tx }, rx)
}
