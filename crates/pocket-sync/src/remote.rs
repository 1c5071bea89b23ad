//! # Remote Seams
//!
//! Trait boundaries between the engine and the host's backend. The engine
//! never speaks a wire protocol itself; the host supplies a [`RemoteStore`]
//! for mutations and a [`ChannelTransport`] for change feeds.
//!
//! ## Call Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OfflineActionQueue ──► RemoteStore::{insert,update,delete}             │
//! │                              │                                          │
//! │                              ├── Ok(())            action Done          │
//! │                              ├── Err(Conflict{..})  resolver engaged    │
//! │                              ├── Err(Transient)     retry with backoff  │
//! │                              └── Err(Permanent)     action Failed       │
//! │                                                                         │
//! │  SubscriptionManager ──► ChannelTransport::open ──► ChannelEvents       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use pocket_core::types::ChangeEvent;

// =============================================================================
// Remote Errors
// =============================================================================

/// Outcome classification for remote mutation calls. The queue's retry and
/// conflict behavior is driven entirely by which variant comes back.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote holds a newer or diverged version of the record. Carries
    /// the remote payload so resolution can run without another fetch.
    #[error("remote record diverged")]
    Conflict { remote: Value },

    /// Temporary failure; the mutation may succeed if retried later.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote did not answer in time. Treated like [`Self::Transient`]
    /// for retry purposes.
    #[error("remote call timed out")]
    Timeout,

    /// The remote rejected the mutation and always will. Consumes the
    /// action's remaining attempts.
    #[error("permanent remote rejection: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// True for failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_) | RemoteError::Timeout)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Remote Store
// =============================================================================

/// Host-supplied backend for applying queued mutations.
///
/// Implementations must be idempotent enough that a retried call after a
/// timeout does not corrupt data; the queue cannot know whether a timed-out
/// call landed.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a record.
    async fn insert(&self, target: &str, payload: &Value) -> RemoteResult<()>;

    /// Updates the record identified by `key` within `target`.
    async fn update(&self, target: &str, key: &str, payload: &Value) -> RemoteResult<()>;

    /// Deletes the record identified by `key` within `target`. Deleting a
    /// record that is already gone is a success.
    async fn delete(&self, target: &str, key: &str) -> RemoteResult<()>;
}

// =============================================================================
// Channel Transport
// =============================================================================

/// A live change feed for one channel. Dropping the receiver closes the
/// subscription on the transport side.
pub struct ChannelEvents {
    pub receiver: mpsc::Receiver<ChangeEvent>,
}

/// Host-supplied backend for realtime change feeds.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Opens a change feed for `target`, tagged with `channel_id`. An
    /// optional `filter` scopes the feed server-side, for example to one
    /// owner's records. Returns once the subscription is acknowledged; the
    /// receiver then yields events until the feed drops or the receiver is
    /// dropped.
    async fn open(
        &self,
        channel_id: &str,
        target: &str,
        filter: Option<&str>,
    ) -> RemoteResult<ChannelEvents>;
}
