//! # Pocket Sync Engine
//!
//! Offline-first mutation queue with conflict resolution, plus a
//! connectivity-aware subscription manager for realtime change feeds.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            pocket-sync                                  │
//! │                                                                         │
//! │   ┌───────────┐     ┌────────────────────┐     ┌────────────────────┐   │
//! │   │ SyncAgent │────►│ OfflineActionQueue │────►│ RemoteStore (host) │   │
//! │   │  (facade) │     │  enqueue / drain   │     └────────────────────┘   │
//! │   │           │     └─────────┬──────────┘                              │
//! │   │           │               │ write-through                           │
//! │   │           │     ┌─────────▼──────────┐                              │
//! │   │           │     │    pocket-store    │                              │
//! │   │           │     └────────────────────┘                              │
//! │   │           │     ┌────────────────────┐     ┌────────────────────┐   │
//! │   │           │────►│ SubscriptionManager│────►│ ChannelTransport   │   │
//! │   └─────┬─────┘     │  channels/reconnect│     │      (host)        │   │
//! │         │           └────────────────────┘     └────────────────────┘   │
//! │         ▼                                                               │
//! │   ConnectivityMonitor (host-fed reachability)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```no_run
//! use std::sync::Arc;
//! use pocket_sync::{SyncAgent, SyncConfig};
//! use pocket_core::types::ActionKind;
//! use serde_json::json;
//!
//! # async fn example(
//! #     remote: Arc<dyn pocket_sync::RemoteStore>,
//! #     transport: Arc<dyn pocket_sync::ChannelTransport>,
//! # ) -> pocket_sync::SyncResult<()> {
//! let agent = SyncAgent::start(SyncConfig::default(), remote, transport).await?;
//!
//! // Mutations queue locally and drain when reachable.
//! agent
//!     .enqueue(
//!         ActionKind::Insert,
//!         "notes",
//!         json!({"id": "n1", "body": "offline first"}),
//!         None,
//!         "user-1",
//!     )
//!     .await?;
//!
//! agent.set_reachable(true);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod remote;
pub mod status;
pub mod subscription;

pub use agent::SyncAgent;
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use monitor::{connectivity_channel, ConnectivityHandle};
pub use queue::{DrainSkipped, DrainSummary, OfflineActionQueue};
pub use remote::{ChannelEvents, ChannelTransport, RemoteError, RemoteResult, RemoteStore};
pub use status::Diagnostics;
pub use subscription::{ChangeCallback, ManagerSnapshot, SubscriptionHandle, SubscriptionManager};
