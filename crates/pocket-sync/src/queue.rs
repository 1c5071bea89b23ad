//! # Offline Action Queue
//!
//! The write-through mutation queue and its drain loop.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Queue Drain Flow                                 │
//! │                                                                         │
//! │  process_queue()                                                        │
//! │       │  already draining? ──► no-op                                    │
//! │       │  offline?          ──► no-op                                    │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  loop:                                                          │   │
//! │  │    1. batch = eligible actions, oldest first, LIMIT batch_size  │   │
//! │  │    2. mark batch InFlight                                       │   │
//! │  │    3. issue remote calls in id order (bounded concurrency)      │   │
//! │  │    4. per action:                                               │   │
//! │  │         Ok            ──► Done (row deleted)                    │   │
//! │  │         Conflict      ──► resolver ──► apply / Conflict Record  │   │
//! │  │         Transient     ──► attempts+1, schedule backoff retry    │   │
//! │  │         Permanent     ──► Failed                                │   │
//! │  │    5. empty batch ──► break                                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Retry N delay: min(base * 2^(N-1), max)   base 1s, max 30s          │
//! │  • Remote call timeout: 10s (counts as a transient failure)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use pocket_core::backoff::retry_delay;
use pocket_core::resolver::{resolve, Resolution};
use pocket_core::types::{ActionKind, ActionRecord, ActionState, ConflictRecord, RECORD_KEY_FIELD};
use pocket_store::Store;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteError, RemoteStore};

// =============================================================================
// Drain Summary
// =============================================================================

/// Why a `process_queue` call did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkipped {
    /// Another drain is already running.
    AlreadyRunning,
    /// The device is offline; the queue holds.
    Offline,
}

/// Result of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Actions applied remotely and removed from the queue.
    pub completed: u64,
    /// Actions rescheduled for a later attempt.
    pub retried: u64,
    /// Actions that became permanently Failed.
    pub failed: u64,
    /// Conflicts resolved automatically during this drain.
    pub resolved: u64,
    /// Conflict Records created for the caller to decide.
    pub conflicts: u64,
    /// Set when the drain did not run at all.
    pub skipped: Option<DrainSkipped>,
}

impl DrainSummary {
    fn skipped(reason: DrainSkipped) -> Self {
        DrainSummary {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// True when every processed action ended Done.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_none() && self.retried == 0 && self.failed == 0 && self.conflicts == 0
    }
}

/// Outcome of one remote attempt, decided before any state is written.
enum AttemptOutcome {
    Done,
    Resolved,
    Conflict(ConflictRecord),
    Retry(String),
    Fail(String),
}

// =============================================================================
// Offline Action Queue
// =============================================================================

/// The durable mutation queue.
///
/// Enqueueing is always local and always succeeds once persisted; draining
/// pushes the queue to the [`RemoteStore`] in creation order. One logical
/// drain runs at a time.
pub struct OfflineActionQueue {
    store: Store,
    remote: Arc<dyn RemoteStore>,
    config: Arc<SyncConfig>,
    reachability: tokio::sync::watch::Receiver<bool>,

    /// Serializes drains. `try_lock` makes overlapping calls no-ops
    /// instead of queueing up redundant runs.
    drain_lock: Mutex<()>,

    /// Observation-only drain flag. Status reads look at this instead of
    /// touching `drain_lock`, so a status check can never make a real drain
    /// look already-running.
    drain_active: AtomicBool,
}

/// Clears the drain-active flag when the drain scope ends, error paths
/// included.
struct DrainActiveGuard<'a>(&'a AtomicBool);

impl Drop for DrainActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineActionQueue {
    pub fn new(
        store: Store,
        remote: Arc<dyn RemoteStore>,
        config: Arc<SyncConfig>,
        reachability: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        OfflineActionQueue {
            store,
            remote,
            config,
            reachability,
            drain_lock: Mutex::new(()),
            drain_active: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Validates and persists a mutation. Returns the queued record; the
    /// caller may treat the mutation as accepted once this returns.
    pub async fn enqueue(
        &self,
        kind: ActionKind,
        target: &str,
        payload: Value,
        original_payload: Option<Value>,
        owner: &str,
    ) -> SyncResult<ActionRecord> {
        if target.is_empty() {
            return Err(SyncError::InvalidAction("target must not be empty".into()));
        }
        if !payload.is_object() {
            return Err(SyncError::InvalidAction(
                "payload must be a JSON object".into(),
            ));
        }

        // Updates and deletes must address an existing remote record.
        if matches!(kind, ActionKind::Update | ActionKind::Delete) {
            let key = payload.get(RECORD_KEY_FIELD).and_then(Value::as_str);
            if key.map_or(true, str::is_empty) {
                return Err(SyncError::InvalidAction(format!(
                    "{kind} payload must carry a non-empty \"{RECORD_KEY_FIELD}\" field"
                )));
            }
        }

        let record = ActionRecord::new(
            kind,
            target,
            payload,
            original_payload,
            owner,
            self.config.queue.max_retries,
        );
        self.store.actions().insert(&record).await?;

        info!(
            action_id = %record.id,
            kind = %record.kind,
            target = %record.target,
            "Action enqueued"
        );
        Ok(record)
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Drains the queue to the remote.
    ///
    /// No-op while offline or while another drain is running; both cases
    /// come back in the summary rather than as errors.
    pub async fn process_queue(&self) -> SyncResult<DrainSummary> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress, skipping");
            return Ok(DrainSummary::skipped(DrainSkipped::AlreadyRunning));
        };

        if !*self.reachability.borrow() {
            debug!("Offline, queue drain skipped");
            return Ok(DrainSummary::skipped(DrainSkipped::Offline));
        }

        self.drain_active.store(true, Ordering::Release);
        let _active = DrainActiveGuard(&self.drain_active);

        let mut summary = DrainSummary::default();
        let batch_size = self.config.queue.batch_size;

        loop {
            // Reachability can drop mid-drain; stop between batches.
            if !*self.reachability.borrow() {
                warn!("Went offline mid-drain, stopping");
                break;
            }

            let batch = self.store.actions().list_eligible(Utc::now(), batch_size).await?;
            if batch.is_empty() {
                break;
            }

            debug!(batch_len = batch.len(), "Processing drain batch");

            for action in &batch {
                self.store.actions().mark_in_flight(&action.id).await?;
            }

            // Remote calls are issued in id order with bounded concurrency;
            // `buffered` also yields outcomes in that order, so persisted
            // transitions stay first-in-first-out.
            let outcomes: Vec<(ActionRecord, AttemptOutcome)> = stream::iter(batch)
                .map(|action| async {
                    let outcome = self.attempt(&action).await;
                    (action, outcome)
                })
                .buffered(batch_size as usize)
                .collect()
                .await;

            for (action, outcome) in outcomes {
                self.apply_outcome(&action, outcome, &mut summary).await?;
            }
        }

        if summary.is_clean() {
            self.store.metadata().set_last_sync_time(Utc::now()).await?;
        }

        info!(
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            resolved = summary.resolved,
            conflicts = summary.conflicts,
            "Queue drain finished"
        );
        Ok(summary)
    }

    /// One remote attempt for one action. Pure with respect to the store;
    /// all persistence happens in `apply_outcome`.
    async fn attempt(&self, action: &ActionRecord) -> AttemptOutcome {
        match self.call_remote(action).await {
            Ok(()) => AttemptOutcome::Done,
            Err(RemoteError::Conflict { remote }) => self.handle_conflict(action, remote).await,
            Err(e @ (RemoteError::Transient(_) | RemoteError::Timeout)) => {
                AttemptOutcome::Retry(e.to_string())
            }
            Err(RemoteError::Permanent(reason)) => AttemptOutcome::Fail(reason),
        }
    }

    /// Dispatches the action's mutation to the remote, bounded by the
    /// configured call timeout.
    async fn call_remote(&self, action: &ActionRecord) -> Result<(), RemoteError> {
        let call = async {
            match action.kind {
                ActionKind::Insert => self.remote.insert(&action.target, &action.payload).await,
                ActionKind::Update => {
                    let key = action.record_key().unwrap_or_default();
                    self.remote.update(&action.target, key, &action.payload).await
                }
                ActionKind::Delete => {
                    let key = action.record_key().unwrap_or_default();
                    self.remote.delete(&action.target, key).await
                }
            }
        };

        let limit = Duration::from_millis(self.config.queue.remote_timeout_ms);
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    /// Runs the configured resolution strategy against the remote payload
    /// the conflict carried.
    async fn handle_conflict(&self, action: &ActionRecord, remote_payload: Value) -> AttemptOutcome {
        let strategy = &self.config.conflict.strategy;
        let allow = self.config.merge_fields_for(&action.target);

        match resolve(&action.payload, &remote_payload, strategy, allow) {
            Resolution::Use(value) => {
                debug!(
                    action_id = %action.id,
                    strategy = %strategy,
                    "Conflict resolved automatically"
                );
                // The decided value is applied as a direct update.
                let key = action.record_key().unwrap_or_default();
                let limit = Duration::from_millis(self.config.queue.remote_timeout_ms);
                let apply = self.remote.update(&action.target, key, &value);
                match timeout(limit, apply).await {
                    Ok(Ok(())) => AttemptOutcome::Resolved,
                    Ok(Err(e @ (RemoteError::Transient(_) | RemoteError::Timeout))) => {
                        AttemptOutcome::Retry(e.to_string())
                    }
                    Ok(Err(RemoteError::Permanent(reason))) => AttemptOutcome::Fail(reason),
                    // The record moved again while we were resolving. Hand
                    // the decision to the caller rather than chasing it.
                    Ok(Err(RemoteError::Conflict { remote })) => AttemptOutcome::Conflict(
                        ConflictRecord::new(&action.id, &action.target, action.payload.clone(), remote),
                    ),
                    Err(_) => AttemptOutcome::Retry(RemoteError::Timeout.to_string()),
                }
            }
            Resolution::Undecided => AttemptOutcome::Conflict(ConflictRecord::new(
                &action.id,
                &action.target,
                action.payload.clone(),
                remote_payload,
            )),
        }
    }

    /// Persists the outcome of one attempt.
    async fn apply_outcome(
        &self,
        action: &ActionRecord,
        outcome: AttemptOutcome,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        match outcome {
            AttemptOutcome::Done => {
                self.store.actions().delete(&action.id).await?;
                debug!(action_id = %action.id, "Action applied remotely");
                summary.completed += 1;
            }
            AttemptOutcome::Resolved => {
                self.store.actions().delete(&action.id).await?;
                summary.completed += 1;
                summary.resolved += 1;
            }
            AttemptOutcome::Conflict(record) => {
                self.store.conflicts().insert(&record).await?;
                self.store.actions().return_to_pending(&action.id).await?;
                warn!(
                    action_id = %action.id,
                    target = %action.target,
                    "Conflict recorded, awaiting resolution"
                );
                summary.conflicts += 1;
            }
            AttemptOutcome::Retry(reason) => {
                let attempts = action.attempts + 1;
                if attempts >= action.attempt_limit {
                    self.store.actions().mark_failed(&action.id, attempts, &reason).await?;
                    error!(
                        action_id = %action.id,
                        attempts,
                        error = %reason,
                        "Action failed permanently, retries exhausted"
                    );
                    summary.failed += 1;
                } else {
                    let delay = retry_delay(
                        attempts,
                        Duration::from_millis(self.config.queue.retry_base_delay_ms),
                        Duration::from_millis(self.config.queue.max_retry_delay_ms),
                    );
                    let next = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
                    self.store
                        .actions()
                        .mark_pending_retry(&action.id, attempts, next, &reason)
                        .await?;
                    warn!(
                        action_id = %action.id,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Action attempt failed, retry scheduled"
                    );
                    summary.retried += 1;
                }
            }
            AttemptOutcome::Fail(reason) => {
                self.store
                    .actions()
                    .mark_failed(&action.id, action.attempts + 1, &reason)
                    .await?;
                error!(action_id = %action.id, error = %reason, "Remote rejected action");
                summary.failed += 1;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Conflict Handling
    // =========================================================================

    /// Lists conflicts awaiting a decision.
    pub async fn list_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self.store.conflicts().list_unresolved().await?)
    }

    /// Applies a caller-supplied resolution to a recorded conflict. The
    /// decided value is pushed to the remote immediately; success removes
    /// the action from the queue. A remote failure leaves the conflict and
    /// the action untouched so the call can be retried.
    pub async fn resolve_conflict(&self, action_id: &str, resolution: Value) -> SyncResult<()> {
        let conflict = self
            .store
            .conflicts()
            .get(action_id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(action_id.to_string()))?;

        if conflict.resolved {
            return Err(SyncError::ConflictNotFound(action_id.to_string()));
        }

        let action = self
            .store
            .actions()
            .get(action_id)
            .await?
            .ok_or_else(|| SyncError::ActionNotFound(action_id.to_string()))?;

        let key = action.record_key().unwrap_or_default();
        let limit = Duration::from_millis(self.config.queue.remote_timeout_ms);
        let apply = self.remote.update(&action.target, key, &resolution);
        match timeout(limit, apply).await {
            Ok(Ok(())) => {}
            Ok(Err(RemoteError::Conflict { .. })) => {
                // The record moved again while the caller was deciding.
                warn!(action_id, "Resolution raced a newer remote write");
                return Err(SyncError::ConflictUnresolved(action_id.to_string()));
            }
            Ok(Err(RemoteError::Permanent(reason))) => {
                return Err(SyncError::RemoteRejected {
                    action_id: action_id.to_string(),
                    reason,
                });
            }
            Ok(Err(e)) => return Err(SyncError::RemoteUnavailable(e.to_string())),
            Err(_) => return Err(SyncError::RemoteTimeout(self.config.queue.remote_timeout_ms)),
        }

        self.store.conflicts().mark_resolved(action_id, &resolution).await?;
        // Deleting the action cascades the conflict row away with it.
        self.store.actions().delete(action_id).await?;

        info!(action_id, "Conflict resolved by caller");
        Ok(())
    }

    // =========================================================================
    // Failed-Action Handling
    // =========================================================================

    /// Lists permanently failed actions.
    pub async fn list_failed(&self) -> SyncResult<Vec<ActionRecord>> {
        Ok(self.store.actions().list_failed().await?)
    }

    /// Drops a failed action from the queue for good.
    pub async fn discard_failed(&self, action_id: &str) -> SyncResult<()> {
        let action = self
            .store
            .actions()
            .get(action_id)
            .await?
            .ok_or_else(|| SyncError::ActionNotFound(action_id.to_string()))?;

        if action.state != ActionState::Failed {
            return Err(SyncError::InvalidAction(format!(
                "action {action_id} is {}, only failed actions can be discarded",
                action.state
            )));
        }

        self.store.actions().delete(action_id).await?;
        info!(action_id, "Failed action discarded");
        Ok(())
    }

    /// Gives a failed action a fresh attempt budget.
    pub async fn re_enqueue_failed(&self, action_id: &str) -> SyncResult<()> {
        self.store.actions().reset_for_retry(action_id).await?;
        info!(action_id, "Failed action re-enqueued");
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Pending actions (including retry-scheduled ones).
    pub async fn pending_count(&self) -> SyncResult<u64> {
        Ok(self.store.actions().count_by_state(ActionState::Pending).await?)
    }

    /// Actions currently handed to the remote.
    pub async fn in_flight_count(&self) -> SyncResult<u64> {
        Ok(self.store.actions().count_by_state(ActionState::InFlight).await?)
    }

    /// Permanently failed actions.
    pub async fn failed_count(&self) -> SyncResult<u64> {
        Ok(self.store.actions().count_by_state(ActionState::Failed).await?)
    }

    /// Conflicts awaiting a decision.
    pub async fn conflict_count(&self) -> SyncResult<u64> {
        Ok(self.store.conflicts().count_unresolved().await?)
    }

    /// True while a drain is running. Reads a flag rather than trying
    /// the drain lock, so it never competes with `process_queue` for it.
    pub fn is_draining(&self) -> bool {
        self.drain_active.load(Ordering::Acquire)
    }
}
