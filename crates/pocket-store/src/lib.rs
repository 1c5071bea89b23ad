//! # Pocket Store
//!
//! SQLite persistence for the offline action queue.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          pocket-store                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  pool        Store handle, WAL pool, startup recovery               │
//! │  migrations  Embedded schema migrations                             │
//! │  repository  actions / conflicts / metadata row mapping             │
//! │  error       Storage error taxonomy                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is the durability boundary: every queue transition is a
//! write-through, so a killed process restarts with the exact queue it
//! acknowledged.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use pool::{Store, StoreConfig};
pub use repository::action::ActionRepository;
pub use repository::conflict::ConflictRepository;
pub use repository::metadata::MetadataRepository;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pocket_core::types::{ActionKind, ActionRecord, ActionState, ConflictRecord};
    use serde_json::json;

    async fn memory_store() -> Store {
        Store::open(StoreConfig::in_memory())
            .await
            .expect("in-memory store opens")
    }

    fn make_action(target: &str) -> ActionRecord {
        ActionRecord::new(
            ActionKind::Update,
            target,
            json!({"id": "rec-1", "name": "widget"}),
            None,
            "user-1",
            3,
        )
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = memory_store().await;
        let action = make_action("items");

        store.actions().insert(&action).await.unwrap();
        let loaded = store.actions().get(&action.id).await.unwrap().unwrap();

        // Timestamps are stored at millisecond precision.
        assert_eq!(loaded.id, action.id);
        assert_eq!(loaded.kind, action.kind);
        assert_eq!(loaded.target, action.target);
        assert_eq!(loaded.payload, action.payload);
        assert_eq!(loaded.owner, action.owner);
        assert_eq!(loaded.state, action.state);
        assert_eq!(loaded.attempt_limit, action.attempt_limit);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            action.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn eligible_actions_come_back_oldest_first() {
        let store = memory_store().await;
        let repo = store.actions();

        let a = make_action("items");
        let b = make_action("items");
        let c = make_action("items");
        for action in [&a, &b, &c] {
            repo.insert(action).await.unwrap();
        }

        let eligible = repo.list_eligible(Utc::now(), 10).await.unwrap();
        let ids: Vec<&str> = eligible.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);
    }

    #[tokio::test]
    async fn eligibility_respects_next_attempt_schedule() {
        let store = memory_store().await;
        let repo = store.actions();
        let action = make_action("items");
        repo.insert(&action).await.unwrap();

        let now = Utc::now();
        let later = now + Duration::seconds(2);
        repo.mark_in_flight(&action.id).await.unwrap();
        repo.mark_pending_retry(&action.id, 1, later, "remote unavailable")
            .await
            .unwrap();

        assert!(repo.list_eligible(now, 10).await.unwrap().is_empty());
        assert_eq!(repo.list_eligible(later, 10).await.unwrap().len(), 1);

        let loaded = repo.get(&action.id).await.unwrap().unwrap();
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("remote unavailable"));
    }

    #[tokio::test]
    async fn unresolved_conflict_holds_action_back() {
        let store = memory_store().await;
        let action = make_action("items");
        store.actions().insert(&action).await.unwrap();

        let conflict = ConflictRecord::new(
            &action.id,
            "items",
            json!({"id": "rec-1", "name": "local"}),
            json!({"id": "rec-1", "name": "remote"}),
        );
        store.conflicts().insert(&conflict).await.unwrap();

        assert!(store.actions().list_eligible(Utc::now(), 10).await.unwrap().is_empty());
        assert_eq!(store.conflicts().count_unresolved().await.unwrap(), 1);

        store
            .conflicts()
            .mark_resolved(&action.id, &json!({"id": "rec-1", "name": "merged"}))
            .await
            .unwrap();

        assert_eq!(store.actions().list_eligible(Utc::now(), 10).await.unwrap().len(), 1);
        assert_eq!(store.conflicts().count_unresolved().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_action_can_be_reset() {
        let store = memory_store().await;
        let repo = store.actions();
        let action = make_action("items");
        repo.insert(&action).await.unwrap();

        repo.mark_failed(&action.id, 3, "gave up").await.unwrap();
        assert_eq!(repo.count_by_state(ActionState::Failed).await.unwrap(), 1);
        assert_eq!(repo.list_failed().await.unwrap().len(), 1);

        repo.reset_for_retry(&action.id).await.unwrap();
        let loaded = repo.get(&action.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ActionState::Pending);
        assert_eq!(loaded.attempts, 0);
        assert!(loaded.last_error.is_none());
    }

    #[tokio::test]
    async fn deleting_action_cascades_conflict() {
        let store = memory_store().await;
        let action = make_action("items");
        store.actions().insert(&action).await.unwrap();
        store
            .conflicts()
            .insert(&ConflictRecord::new(
                &action.id,
                "items",
                json!({}),
                json!({}),
            ))
            .await
            .unwrap();

        store.actions().delete(&action.id).await.unwrap();
        assert!(store.conflicts().get(&action.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_sync_time_round_trips() {
        let store = memory_store().await;
        assert!(store.metadata().last_sync_time().await.unwrap().is_none());

        // Store at millisecond precision, so truncate before comparing.
        let at = Utc::now();
        store.metadata().set_last_sync_time(at).await.unwrap();
        let loaded = store.metadata().last_sync_time().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp_millis(), at.timestamp_millis());
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let action = make_action("notes");
        {
            let store = Store::open(StoreConfig::new(&path)).await.unwrap();
            store.actions().insert(&action).await.unwrap();
            store.actions().mark_in_flight(&action.id).await.unwrap();
            store.close().await;
        }

        // Reopen simulates a process restart. The stranded in-flight row
        // must come back Pending with its payload intact.
        let store = Store::open(StoreConfig::new(&path)).await.unwrap();
        let loaded = store.actions().get(&action.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ActionState::Pending);
        assert_eq!(loaded.payload, action.payload);
        assert_eq!(loaded.id, action.id);
    }
}
