//! # Core Types
//!
//! Data model for the offline mutation queue and subscription channels.
//!
//! ## Action Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Action Record Lifecycle                       │
//! │                                                                     │
//! │  enqueue()                                                          │
//! │     │                                                               │
//! │     ▼                                                               │
//! │  ┌─────────┐  drain batch  ┌──────────┐  remote ok   ┌──────┐       │
//! │  │ Pending │ ────────────► │ InFlight │ ───────────► │ Done │       │
//! │  └─────────┘               └────┬─────┘              └──────┘       │
//! │     ▲    ▲                      │                  (row removed)    │
//! │     │    │     conflict, resolver undecided                         │
//! │     │    └──────────────────────┤  (+ Conflict Record)              │
//! │     │                           │                                   │
//! │     │  other failure,           │                                   │
//! │     │  attempts < limit         ▼                                   │
//! │     └───────────────── backoff delay                                │
//! │                                 │                                   │
//! │                attempts == limit▼                                   │
//! │                            ┌────────┐                               │
//! │                            │ Failed │  (never auto-retried)         │
//! │                            └────────┘                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Labels
// =============================================================================

/// A persisted or configured label that names no known variant. Carries
/// which enum was being parsed so a corrupt row or a config typo reads
/// back usefully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: '{value}'")]
pub struct UnknownLabel {
    /// Human name of the enum being parsed.
    pub what: &'static str,
    /// The offending input.
    pub value: String,
}

impl UnknownLabel {
    pub fn new(what: &'static str, value: &str) -> Self {
        UnknownLabel {
            what,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Action Records
// =============================================================================

/// The kind of remote mutation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Insert a new record into the target collection.
    Insert,
    /// Update an existing record (payload must carry the record key).
    Update,
    /// Delete an existing record (payload must carry the record key).
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Insert => write!(f, "insert"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(ActionKind::Insert),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            other => Err(UnknownLabel::new("action kind", other)),
        }
    }
}

/// Processing state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Waiting to be drained (or waiting out a backoff delay).
    Pending,
    /// Selected for the current drain batch; remote call outstanding.
    InFlight,
    /// Applied remotely. Done actions are removed from the store.
    Done,
    /// Retry limit reached; requires explicit discard or re-enqueue.
    Failed,
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionState::Pending => write!(f, "pending"),
            ActionState::InFlight => write!(f, "in_flight"),
            ActionState::Done => write!(f, "done"),
            ActionState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActionState {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionState::Pending),
            "in_flight" => Ok(ActionState::InFlight),
            "done" => Ok(ActionState::Done),
            "failed" => Ok(ActionState::Failed),
            other => Err(UnknownLabel::new("action state", other)),
        }
    }
}

/// A single durable pending mutation.
///
/// The id is a UUID v7: millisecond timestamp followed by a random suffix,
/// so lexicographic id order is creation order. FIFO drain order relies on
/// this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique, generated at enqueue time, never reused.
    pub id: String,

    /// Kind of remote mutation.
    pub kind: ActionKind,

    /// Remote collection/table this action targets.
    pub target: String,

    /// Mutation data. Updates and deletes carry the record key in `"id"`.
    pub payload: Value,

    /// Optional snapshot taken at enqueue time, for conflict comparison.
    pub original_payload: Option<Value>,

    /// Local user/session that created the action.
    pub owner: String,

    /// Creation timestamp, used for last-write-wins comparisons.
    pub created_at: DateTime<Utc>,

    /// Remote attempts made so far.
    pub attempts: u32,

    /// Retry ceiling; reaching it marks the action Failed.
    pub attempt_limit: u32,

    /// Current lifecycle state.
    pub state: ActionState,

    /// Last failure diagnostic, if any.
    pub last_error: Option<String>,

    /// Earliest instant the next attempt may run. `None` means immediately
    /// eligible. Persisting the schedule keeps eligibility a pure function
    /// of `now`.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl ActionRecord {
    /// Creates a new Pending action with a fresh creation-ordered id.
    pub fn new(
        kind: ActionKind,
        target: impl Into<String>,
        payload: Value,
        original_payload: Option<Value>,
        owner: impl Into<String>,
        attempt_limit: u32,
    ) -> Self {
        ActionRecord {
            id: new_action_id(),
            kind,
            target: target.into(),
            payload,
            original_payload,
            owner: owner.into(),
            created_at: Utc::now(),
            attempts: 0,
            attempt_limit,
            state: ActionState::Pending,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// The remote record key carried in the payload, if present.
    pub fn record_key(&self) -> Option<&str> {
        self.payload.get(RECORD_KEY_FIELD).and_then(Value::as_str)
    }

    /// True once the retry ceiling has been consumed.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.attempt_limit
    }
}

/// Payload field holding the remote record's unique key.
pub const RECORD_KEY_FIELD: &str = "id";

/// Generates a creation-ordered action id (UUID v7).
pub fn new_action_id() -> String {
    Uuid::now_v7().to_string()
}

// =============================================================================
// Conflict Records
// =============================================================================

/// A detected divergence between local and remote state, awaiting a
/// caller-supplied resolution.
///
/// `action_id` is a lookup key back to the triggering action, not an
/// ownership relation; the action itself stays Pending in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Id of the action whose remote application conflicted.
    pub action_id: String,

    /// Remote collection/table involved.
    pub target: String,

    /// The local payload that failed to apply.
    pub local_payload: Value,

    /// Remote state fetched at conflict time.
    pub remote_payload: Value,

    /// When the divergence was detected.
    pub detected_at: DateTime<Utc>,

    /// Whether a resolution has been applied.
    pub resolved: bool,

    /// The value applied once resolved.
    pub resolution: Option<Value>,
}

impl ConflictRecord {
    /// Creates an unresolved conflict for the given action.
    pub fn new(
        action_id: impl Into<String>,
        target: impl Into<String>,
        local_payload: Value,
        remote_payload: Value,
    ) -> Self {
        ConflictRecord {
            action_id: action_id.into(),
            target: target.into(),
            local_payload,
            remote_payload,
            detected_at: Utc::now(),
            resolved: false,
            resolution: None,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Shared reachability/subscription health state machine.
///
/// ## Transitions
/// ```text
/// Offline      ──reachable / force_reconnect──►  Connecting
/// Connecting   ──first open ack──────────────►  Online
/// Connecting   ──transport error─────────────►  Reconnecting
/// Online       ──transport error─────────────►  Reconnecting
/// Reconnecting ──open ack────────────────────►  Online
/// any state    ──unreachable / backgrounded──►  Offline
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connectivity, or the host application is backgrounded.
    Offline,
    /// Connectivity confirmed; waiting for the first channel open ack.
    Connecting,
    /// At least one channel open and healthy.
    Online,
    /// A channel failed; backoff retry scheduled.
    Reconnecting,
}

impl ConnectionState {
    /// Whether a transition from `self` to `next` is in the documented
    /// state machine. Self-transitions are allowed no-ops; anything may
    /// drop to Offline.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Connecting, Offline, Online, Reconnecting};
        if self == next || next == Offline {
            return true;
        }
        matches!(
            (self, next),
            (Offline, Connecting)
                | (Connecting, Online)
                | (Connecting, Reconnecting)
                | (Online, Reconnecting)
                | (Reconnecting, Online)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Offline => write!(f, "offline"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

// =============================================================================
// Channel Events
// =============================================================================

/// Status of a logical subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Not connected (initial, backgrounded, or unsubscribed).
    Closed,
    /// Open request outstanding.
    Opening,
    /// Receiving events.
    Open,
    /// Transport error; reconnect machinery owns recovery.
    Errored,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Closed => write!(f, "closed"),
            ChannelStatus::Opening => write!(f, "opening"),
            ChannelStatus::Open => write!(f, "open"),
            ChannelStatus::Errored => write!(f, "errored"),
        }
    }
}

/// One server-pushed change delivered on a subscription channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Channel the event arrived on.
    pub channel_id: String,

    /// Remote collection/table that changed.
    pub target: String,

    /// Change payload as sent by the remote service.
    pub payload: Value,

    /// Local arrival timestamp.
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_ids_sort_in_creation_order() {
        let a = new_action_id();
        let b = new_action_id();
        let c = new_action_id();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_new_action_defaults() {
        let action = ActionRecord::new(
            ActionKind::Update,
            "notes",
            json!({"id": "n-1", "title": "x"}),
            None,
            "user-1",
            3,
        );
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.attempts, 0);
        assert_eq!(action.record_key(), Some("n-1"));
        assert!(action.next_attempt_at.is_none());
        assert!(!action.exhausted());
    }

    #[test]
    fn test_connection_state_transitions() {
        use ConnectionState::*;
        assert!(Offline.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Online));
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Online.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Online));
        // Anything may drop to Offline.
        assert!(Online.can_transition_to(Offline));
        assert!(Reconnecting.can_transition_to(Offline));
        // Skipping states is rejected.
        assert!(!Offline.can_transition_to(Online));
        assert!(!Offline.can_transition_to(Reconnecting));
        assert!(!Online.can_transition_to(Connecting));
        assert!(!Reconnecting.can_transition_to(Connecting));
    }

    #[test]
    fn test_unknown_labels_name_the_enum() {
        let err = "upsert".parse::<ActionKind>().unwrap_err();
        assert_eq!(err, UnknownLabel::new("action kind", "upsert"));
        assert_eq!(err.to_string(), "unknown action kind: 'upsert'");

        let err = "paused".parse::<ActionState>().unwrap_err();
        assert_eq!(err.what, "action state");
    }

    #[test]
    fn test_kind_and_state_round_trip() {
        for kind in [ActionKind::Insert, ActionKind::Update, ActionKind::Delete] {
            assert_eq!(kind.to_string().parse::<ActionKind>().unwrap(), kind);
        }
        for state in [
            ActionState::Pending,
            ActionState::InFlight,
            ActionState::Done,
            ActionState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<ActionState>().unwrap(), state);
        }
    }
}
