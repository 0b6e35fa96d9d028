//! Persistent event accumulator.
//!
//! Grouped notifications are not sent right away. Each (interval, user) pair
//! owns one record under `interval_userId` holding the ordered ids of pending
//! events plus the latest snapshot of the user. The digest runner later pops
//! the record, resolves the ids through the event history and renders one
//! message out of them.
//!
//! Read-modify-write on a record is serialized per key inside the process
//! through [`KeyedLocks`]. Two processes appending to the same key can still
//! race; the backend has no transactions.

use crate::error::{NotificationError, NotificationResult};
use crate::history::EventHistory;
use crate::models::{Event, Interval, Recipient, UserEventIds, UserEvents};
use crate::store::KeyValueStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

/// Named async mutexes, one per accumulator key.
///
/// Entries nobody holds or waits on are dropped on the next acquisition, so
/// the map only grows with the number of keys in use at the same time.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Durable per-user store of pending grouped events.
#[derive(Clone)]
pub struct UserEventStore {
    store: Arc<dyn KeyValueStore>,
    history: Arc<dyn EventHistory>,
    locks: KeyedLocks,
}

impl UserEventStore {
    pub fn new(store: Arc<dyn KeyValueStore>, history: Arc<dyn EventHistory>) -> Self {
        Self {
            store,
            history,
            locks: KeyedLocks::new(),
        }
    }

    /// Append `event_id` to the record of every recipient under `interval`.
    ///
    /// Returns the recipients whose record could not be read or written; the
    /// others are persisted regardless.
    pub async fn append(
        &self,
        interval: Interval,
        event_id: &str,
        recipients: &[Recipient],
    ) -> Vec<Recipient> {
        let mut failed = Vec::new();
        for recipient in recipients {
            let key = interval.record_key(&recipient.opaque_id);
            if let Err(e) = self.append_one(&key, event_id, recipient).await {
                error!(
                    key = %key,
                    user_id = %recipient.opaque_id,
                    event_id = %event_id,
                    error = %e,
                    "Failed to persist event for user"
                );
                failed.push(recipient.clone());
            }
        }
        failed
    }

    async fn append_one(
        &self,
        key: &str,
        event_id: &str,
        recipient: &Recipient,
    ) -> NotificationResult<()> {
        let _guard = self.locks.lock(key).await;

        let mut record = match self.store.read(key).await? {
            Some(raw) => serde_json::from_slice::<UserEventIds>(&raw)?,
            None => UserEventIds::default(),
        };
        record.user = Some(recipient.clone());
        record.event_ids.push(event_id.to_string());

        self.store.write(key, serde_json::to_vec(&record)?).await?;
        debug!(key = %key, pending = record.event_ids.len(), "Appended event");
        Ok(())
    }

    /// Keys of every pending record whose key starts with `prefix`.
    pub async fn list_pending_keys(&self, prefix: &str) -> NotificationResult<Vec<String>> {
        self.store.list_keys(prefix).await
    }

    /// Read the record at `key`, resolve its events and delete it.
    ///
    /// The record is only deleted once resolution succeeded. Any failure
    /// leaves it in place for the next run, so a crash between resolve and
    /// delete can produce a duplicate digest but never loses one.
    pub async fn pop_and_resolve(&self, key: &str) -> NotificationResult<UserEvents> {
        let _guard = self.locks.lock(key).await;

        let raw = self
            .store
            .read(key)
            .await?
            .ok_or_else(|| NotificationError::RecordNotFound(key.to_string()))?;
        let record: UserEventIds = serde_json::from_slice(&raw)?;
        let user = record
            .user
            .ok_or_else(|| NotificationError::Store(format!("record '{key}' has no user")))?;

        let resolved = self.history.get_events(&record.event_ids).await?;
        let events = reassociate(key, &record.event_ids, resolved);

        self.store.delete(key).await?;
        Ok(UserEvents { user, events })
    }
}

/// Put resolved events back into record order; duplicates in the record
/// yield the event once per occurrence.
fn reassociate(key: &str, ids: &[String], resolved: Vec<Event>) -> Vec<Event> {
    let by_id: HashMap<String, Event> = resolved.into_iter().map(|e| (e.id.clone(), e)).collect();
    ids.iter()
        .filter_map(|id| {
            let event = by_id.get(id).cloned();
            if event.is_none() {
                warn!(key = %key, event_id = %id, "Event no longer in history, skipping");
            }
            event
        })
        .collect()
}

impl std::fmt::Debug for UserEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEventStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{InMemoryEventHistory, MockEventHistory};
    use crate::store::{InMemoryStore, MockKeyValueStore};

    fn user(id: &str) -> Recipient {
        Recipient::new(id, format!("User {id}"), format!("{id}@example.org"))
    }

    fn event(id: &str) -> Event {
        Event::new("ShareCreated", &serde_json::json!({"n": id}))
            .unwrap()
            .with_id(id)
    }

    async fn in_memory() -> (UserEventStore, InMemoryStore, InMemoryEventHistory) {
        let store = InMemoryStore::new();
        let history = InMemoryEventHistory::new();
        let accumulator = UserEventStore::new(Arc::new(store.clone()), Arc::new(history.clone()));
        (accumulator, store, history)
    }

    #[tokio::test]
    async fn test_append_then_pop_preserves_order() {
        let (acc, store, history) = in_memory().await;
        history.record(event("e1")).await;
        history.record(event("e2")).await;

        assert!(acc.append(Interval::Daily, "e1", &[user("A")]).await.is_empty());
        assert!(acc.append(Interval::Daily, "e2", &[user("A")]).await.is_empty());

        let popped = acc.pop_and_resolve("daily_A").await.unwrap();
        assert_eq!(popped.user, user("A"));
        let ids: Vec<_> = popped.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);

        assert!(acc.list_pending_keys("daily_").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_append_overwrites_user_snapshot_and_keeps_duplicates() {
        let (acc, store, _) = in_memory().await;
        acc.append(Interval::Weekly, "e1", &[user("A")]).await;
        let renamed = Recipient::new("A", "Renamed", "new@example.org");
        acc.append(Interval::Weekly, "e1", &[renamed.clone()]).await;

        let raw = store.read("weekly_A").await.unwrap().unwrap();
        let record: UserEventIds = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record.user, Some(renamed));
        assert_eq!(record.event_ids, vec!["e1", "e1"]);
    }

    #[tokio::test]
    async fn test_list_pending_keys_by_interval() {
        let (acc, _, _) = in_memory().await;
        acc.append(Interval::Daily, "e1", &[user("A"), user("B")]).await;
        acc.append(Interval::Weekly, "e2", &[user("C")]).await;

        let mut daily = acc.list_pending_keys(&Interval::Daily.key_prefix()).await.unwrap();
        daily.sort();
        assert_eq!(daily, vec!["daily_A", "daily_B"]);
        assert_eq!(
            acc.list_pending_keys(&Interval::Weekly.key_prefix()).await.unwrap(),
            vec!["weekly_C"]
        );
    }

    #[tokio::test]
    async fn test_append_reports_only_failed_recipients() {
        let mut store = MockKeyValueStore::new();
        store.expect_read().returning(|_| Ok(None));
        store
            .expect_write()
            .withf(|key, _| key == "daily_B")
            .returning(|_, _| Err(NotificationError::Store("disk full".into())));
        store
            .expect_write()
            .withf(|key, value| {
                let record: UserEventIds = serde_json::from_slice(value).unwrap();
                key == "daily_A" && record.event_ids == vec!["e1".to_string()]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let acc = UserEventStore::new(Arc::new(store), Arc::new(MockEventHistory::new()));
        let failed = acc.append(Interval::Daily, "e1", &[user("A"), user("B")]).await;
        assert_eq!(failed, vec![user("B")]);
    }

    #[tokio::test]
    async fn test_append_read_failure_skips_write() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_read()
            .returning(|_| Err(NotificationError::Store("timeout".into())));
        store.expect_write().never();

        let acc = UserEventStore::new(Arc::new(store), Arc::new(MockEventHistory::new()));
        let failed = acc.append(Interval::Daily, "e1", &[user("A")]).await;
        assert_eq!(failed, vec![user("A")]);
    }

    #[tokio::test]
    async fn test_pop_keeps_record_when_history_fails() {
        let (_, store, _) = in_memory().await;
        let mut history = MockEventHistory::new();
        history
            .expect_get_events()
            .times(1)
            .returning(|_| Err(NotificationError::History("unavailable".into())));

        let acc = UserEventStore::new(Arc::new(store.clone()), Arc::new(history));
        acc.append(Interval::Daily, "e1", &[user("A")]).await;

        let err = acc.pop_and_resolve("daily_A").await.unwrap_err();
        assert!(matches!(err, NotificationError::History(_)));
        assert!(store.read("daily_A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pop_fails_when_delete_fails() {
        let record = serde_json::to_vec(&UserEventIds {
            user: Some(user("A")),
            event_ids: vec!["e1".into()],
        })
        .unwrap();
        let mut store = MockKeyValueStore::new();
        store
            .expect_read()
            .returning(move |_| Ok(Some(record.clone())));
        store
            .expect_delete()
            .times(1)
            .returning(|_| Err(NotificationError::Store("read-only".into())));
        let mut history = MockEventHistory::new();
        history
            .expect_get_events()
            .returning(|_| Ok(vec![event("e1")]));

        let acc = UserEventStore::new(Arc::new(store), Arc::new(history));
        assert!(acc.pop_and_resolve("daily_A").await.is_err());
    }

    #[tokio::test]
    async fn test_pop_keeps_record_when_read_fails() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_read()
            .times(1)
            .returning(|_| Err(NotificationError::Store("connection reset".into())));
        store.expect_delete().never();
        let mut history = MockEventHistory::new();
        history.expect_get_events().never();

        let acc = UserEventStore::new(Arc::new(store), Arc::new(history));
        let err = acc.pop_and_resolve("daily_A").await.unwrap_err();
        assert!(matches!(err, NotificationError::Store(_)));
    }

    #[tokio::test]
    async fn test_pop_missing_record() {
        let (acc, _, _) = in_memory().await;
        let err = acc.pop_and_resolve("daily_nobody").await.unwrap_err();
        assert!(matches!(err, NotificationError::RecordNotFound(k) if k == "daily_nobody"));
    }

    #[tokio::test]
    async fn test_pop_reorders_and_skips_unknown_events() {
        let record = serde_json::to_vec(&UserEventIds {
            user: Some(user("A")),
            event_ids: vec!["e1".into(), "gone".into(), "e2".into()],
        })
        .unwrap();
        let mut store = MockKeyValueStore::new();
        store
            .expect_read()
            .returning(move |_| Ok(Some(record.clone())));
        store.expect_delete().times(1).returning(|_| Ok(()));
        let mut history = MockEventHistory::new();
        history
            .expect_get_events()
            .withf(|ids| ids.len() == 3)
            .returning(|_| Ok(vec![event("e2"), event("e1")]));

        let acc = UserEventStore::new(Arc::new(store), Arc::new(history));
        let popped = acc.pop_and_resolve("daily_A").await.unwrap();
        let ids: Vec<_> = popped.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_lose_updates() {
        let (acc, store, _) = in_memory().await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                acc.append(Interval::Daily, &format!("e{i}"), &[user("A")]).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_empty());
        }

        let raw = store.read("daily_A").await.unwrap().unwrap();
        let record: UserEventIds = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record.event_ids.len(), 20);
    }

    #[tokio::test]
    async fn test_keyed_locks_release_unused_entries() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.tracked().await, 2);
        }
        let _c = locks.lock("c").await;
        assert_eq!(locks.tracked().await, 1);
    }
}
