//! In-memory session store
//!
//! Uses DashMap for thread-safe concurrent access. Suitable for single-instance
//! deployments or testing. For distributed deployments, use the Redis store.

use crate::error::SessionResult;
use crate::store::{SessionStore, StoredSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

/// In-memory session store
pub struct MemorySessionStore {
    entries: DashMap<String, StoredSession>,
}

impl MemorySessionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory session store");
        Self {
            entries: DashMap::new(),
        }
    }

    /// Drop every entry that is stale at `now`, returning how many were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired session entries");
        }
        purged
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> SessionResult<Option<StoredSession>> {
        trace!(session_id = %id, "Loading session entry");

        let now = Utc::now();
        let entry = self.entries.get(id).map(|e| e.value().clone());
        match entry {
            Some(entry) if !entry.is_fresh_at(now) => {
                // a concurrent save may have replaced the stale entry
                self.entries.remove_if(id, |_, current| !current.is_fresh_at(now));
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save(
        &self,
        id: &str,
        payload: String,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> SessionResult<()> {
        trace!(session_id = %id, bytes = payload.len(), "Saving session entry");

        self.entries.insert(
            id.to_string(),
            StoredSession {
                payload,
                tags: tags.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, id: &str) -> SessionResult<()> {
        trace!(session_id = %id, "Removing session entry");
        self.entries.remove(id);
        Ok(())
    }

    async fn exists_and_fresh(&self, id: &str, now: DateTime<Utc>) -> SessionResult<bool> {
        Ok(self
            .entries
            .get(id)
            .is_some_and(|entry| entry.is_fresh_at(now)))
    }

    async fn ids_with_tag(&self, tag: &str) -> SessionResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.tags.iter().any(|t| t == tag))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn count(&self) -> SessionResult<usize> {
        Ok(self.entries.len())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> SessionResult<usize> {
        Ok(self.purge_expired(now))
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_save_load_remove() {
        let store = MemorySessionStore::new();
        let expires = Utc::now() + ChronoDuration::seconds(60);

        store
            .save("abc", "{}".to_string(), &["cart".to_string()], Some(expires))
            .await
            .unwrap();

        let entry = store.load("abc").await.unwrap().unwrap();
        assert_eq!(entry.payload, "{}");
        assert_eq!(entry.tags, vec!["cart".to_string()]);
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove("abc").await.unwrap();
        assert!(store.load("abc").await.unwrap().is_none());

        // removing twice is fine
        store.remove("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_entries_are_not_loaded() {
        let store = MemorySessionStore::new();
        let expired = Utc::now() - ChronoDuration::seconds(1);

        store.save("old", "{}".to_string(), &[], Some(expired)).await.unwrap();

        assert!(store.load("old").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_load_keeps_fresh_replacement() {
        let store = MemorySessionStore::new();
        let expired = Utc::now() - ChronoDuration::seconds(1);
        let fresh = Utc::now() + ChronoDuration::seconds(60);

        store.save("abc", "old".to_string(), &[], Some(expired)).await.unwrap();
        store.save("abc", "new".to_string(), &[], Some(fresh)).await.unwrap();

        assert_eq!(store.load("abc").await.unwrap().unwrap().payload, "new");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exists_and_fresh_uses_given_instant() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store
            .save("abc", "{}".to_string(), &[], Some(now + ChronoDuration::seconds(60)))
            .await
            .unwrap();

        assert!(store.exists_and_fresh("abc", now).await.unwrap());
        assert!(!store
            .exists_and_fresh("abc", now + ChronoDuration::seconds(61))
            .await
            .unwrap());
        assert!(!store.exists_and_fresh("missing", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_with_tag_and_purge() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let tags = vec!["premium".to_string()];

        store
            .save("a", "{}".to_string(), &tags, Some(now + ChronoDuration::seconds(10)))
            .await
            .unwrap();
        store
            .save("b", "{}".to_string(), &tags, Some(now + ChronoDuration::seconds(100)))
            .await
            .unwrap();
        store.save("c", "{}".to_string(), &[], None).await.unwrap();

        let mut ids = store.ids_with_tag("premium").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let purged = store
            .cleanup_expired(now + ChronoDuration::seconds(50))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
