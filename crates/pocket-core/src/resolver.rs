//! # Conflict Resolver
//!
//! Pure decision function mapping `(local, remote, strategy)` to a
//! resolution. No I/O: the drain loop fetches remote state and applies the
//! outcome; this module only decides.
//!
//! ## Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  server-wins      → remote value, always                            │
//! │  client-wins      → local value, always                             │
//! │  last-write-wins  → newer updatedAt/createdAt; ties favor remote    │
//! │  merge-fields     → remote base + allow-listed local fields         │
//! │  manual           → Undecided (Conflict Record, caller decides)     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::UnknownLabel;

// =============================================================================
// Strategy & Resolution
// =============================================================================

/// Conflict resolution strategy, selected per queue instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Always keep the remote value.
    ServerWins,
    /// Always keep the local value.
    ClientWins,
    /// Keep the side with the newer timestamp; equal timestamps favor
    /// remote (deterministic tie-break).
    LastWriteWins,
    /// Start from remote, overlay local fields named in the per-target
    /// allow-list. An empty list merges nothing.
    MergeFields,
    /// Never auto-resolve; every conflict becomes a Conflict Record.
    Manual,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::LastWriteWins
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategy::ServerWins => write!(f, "server-wins"),
            ConflictStrategy::ClientWins => write!(f, "client-wins"),
            ConflictStrategy::LastWriteWins => write!(f, "last-write-wins"),
            ConflictStrategy::MergeFields => write!(f, "merge-fields"),
            ConflictStrategy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(ConflictStrategy::ServerWins),
            "client-wins" => Ok(ConflictStrategy::ClientWins),
            "last-write-wins" => Ok(ConflictStrategy::LastWriteWins),
            "merge-fields" => Ok(ConflictStrategy::MergeFields),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(UnknownLabel::new("conflict strategy", other)),
        }
    }
}

/// Outcome of a resolution decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply this value as a direct remote update and mark the action Done.
    Use(Value),
    /// No automatic decision; create a Conflict Record for the caller.
    Undecided,
}

impl Resolution {
    /// The resolved value, if one was decided.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolution::Use(v) => Some(v),
            Resolution::Undecided => None,
        }
    }
}

// =============================================================================
// Resolution function
// =============================================================================

/// Decides a conflict between a local payload and the remote state fetched
/// at conflict time.
///
/// `merge_allow` is the explicit field allow-list for the action's target;
/// it is only consulted by `MergeFields`.
pub fn resolve(
    local: &Value,
    remote: &Value,
    strategy: &ConflictStrategy,
    merge_allow: &[String],
) -> Resolution {
    match strategy {
        ConflictStrategy::ServerWins => Resolution::Use(remote.clone()),
        ConflictStrategy::ClientWins => Resolution::Use(local.clone()),
        ConflictStrategy::LastWriteWins => {
            let local_ts = write_timestamp_millis(local);
            let remote_ts = write_timestamp_millis(remote);
            match (local_ts, remote_ts) {
                // Strictly newer local wins; anything else favors remote,
                // including equal or missing timestamps.
                (Some(l), Some(r)) if l > r => Resolution::Use(local.clone()),
                _ => Resolution::Use(remote.clone()),
            }
        }
        ConflictStrategy::MergeFields => {
            Resolution::Use(merge_fields(local, remote, merge_allow))
        }
        ConflictStrategy::Manual => Resolution::Undecided,
    }
}

/// Starts from the remote value and overlays every allow-listed field that
/// exists on the local value. Non-object payloads fall back to remote.
fn merge_fields(local: &Value, remote: &Value, allow: &[String]) -> Value {
    let (Some(local_map), Some(remote_map)) = (local.as_object(), remote.as_object()) else {
        return remote.clone();
    };
    let mut merged = remote_map.clone();
    for field in allow {
        if let Some(v) = local_map.get(field) {
            merged.insert(field.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

/// Extracts the write timestamp from a payload for last-write-wins.
///
/// Looks at `updatedAt` then `createdAt` (plus snake_case spellings, since
/// payload conventions vary by target), accepting RFC3339 strings or epoch
/// milliseconds.
fn write_timestamp_millis(payload: &Value) -> Option<i64> {
    const FIELDS: [&str; 4] = ["updatedAt", "updated_at", "createdAt", "created_at"];
    let map = payload.as_object()?;
    for field in FIELDS {
        if let Some(v) = map.get(field) {
            if let Some(ts) = timestamp_millis(v) {
                return Some(ts);
            }
        }
    }
    None
}

fn timestamp_millis(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}
