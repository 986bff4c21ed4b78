//! Session storage backends
//!
//! The session layer treats its store as a capability: every call may be
//! slow (a network round trip) and every call may fail.
//!
//! - **Memory**: In-process storage using DashMap (default, single-instance)
//! - **Redis**: Distributed storage for multi-instance deployments

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemorySessionStore;
#[cfg(feature = "redis")]
pub use redis::RedisSessionStore;

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// A persisted session entry as the store sees it.
///
/// The payload is opaque to the store; tags and expiry are kept alongside
/// so stores can index and evict without decoding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Serialized session record
    pub payload: String,
    /// Tags for bulk lookup
    pub tags: Vec<String>,
    /// Instant after which the entry is stale
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    /// Whether the entry is still usable at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Key-value persistence for session payloads, keyed by session identifier.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the entry stored under `id`.
    ///
    /// Returns `Ok(None)` if there is none. Freshness is judged by the caller.
    async fn load(&self, id: &str) -> SessionResult<Option<StoredSession>>;

    /// Store or replace the entry under `id` in a single write.
    async fn save(
        &self,
        id: &str,
        payload: String,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> SessionResult<()>;

    /// Remove the entry under `id`. Removing a missing entry is not an error.
    async fn remove(&self, id: &str) -> SessionResult<()>;

    /// Check that an entry exists and has not expired at `now`.
    async fn exists_and_fresh(&self, id: &str, now: DateTime<Utc>) -> SessionResult<bool> {
        Ok(self
            .load(id)
            .await?
            .is_some_and(|entry| entry.is_fresh_at(now)))
    }

    /// Identifiers of all entries carrying `tag`.
    async fn ids_with_tag(&self, tag: &str) -> SessionResult<Vec<String>>;

    /// Number of stored entries.
    async fn count(&self) -> SessionResult<usize>;

    /// Drop entries expired at `now`. Stores with native TTLs return 0.
    async fn cleanup_expired(&self, _now: DateTime<Utc>) -> SessionResult<usize> {
        Ok(0)
    }

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}

/// Run a store operation under a deadline.
pub(crate) async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> SessionResult<T>
where
    F: Future<Output = SessionResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::StoreTimeout { operation, timeout }),
    }
}
