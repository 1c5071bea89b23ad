//! # pocket-core: Pure Decision Logic for Pocket Sync
//!
//! The heart of the sync engine: every decision the offline queue and the
//! subscription manager make is a pure function living here, with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Pocket Sync Architecture                       │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                pocket-sync (engine, tokio)                    │  │
//! │  │   OfflineActionQueue ─ SubscriptionManager ─ SyncAgent        │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │              ★ pocket-core (THIS CRATE) ★                     │  │
//! │  │                                                               │  │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐        │  │
//! │  │   │  types   │ │ resolver │ │ backoff  │ │  status  │        │  │
//! │  │   │ Action   │ │ strategy │ │  delay   │ │ priority │        │  │
//! │  │   │ Conflict │ │ decision │ │  curve   │ │   fold   │        │  │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘        │  │
//! │  │                                                               │  │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS          │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Action/Conflict records, connection state machine, events
//! - [`resolver`] - Conflict resolution strategies as a pure function
//! - [`backoff`] - The shared exponential retry-delay curve
//! - [`status`] - Aggregate status fold with fixed priority
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same input, same output, testable without mocks
//! 2. **No I/O**: database, network, and clock waits are forbidden here
//! 3. **One backoff**: the queue and the channels share one delay curve

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod resolver;
pub mod status;
pub mod types;

// =============================================================================
// Re-exports
// =============================================================================

pub use backoff::{retry_delay, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use resolver::{resolve, ConflictStrategy, Resolution};
pub use status::{aggregate_status, SyncStatus};
pub use types::{
    new_action_id, ActionKind, ActionRecord, ActionState, ChangeEvent, ChannelStatus,
    ConflictRecord, ConnectionState, UnknownLabel, RECORD_KEY_FIELD,
};
