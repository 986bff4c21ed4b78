//! Redis session storage implementation.
//!
//! Entries live under `<namespace>:<id>` with a native TTL; every tag keeps a
//! set of identifiers under `<namespace>:tag:<tag>`.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::id::is_well_formed_session_id;
use crate::store::{SessionStore, StoredSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

/// Redis-backed session store.
///
/// # Examples
///
/// ```no_run
/// use servlet_session::{RedisSessionStore, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::redis("redis://localhost:6379")?
///     .with_namespace("myapp:session");
/// let store = RedisSessionStore::new(config).await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisSessionStore {
    conn: ConnectionManager,
    config: SessionConfig,
}

impl RedisSessionStore {
    /// Create a new Redis session store.
    pub async fn new(config: SessionConfig) -> SessionResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SessionError::StoreUnavailable(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::StoreUnavailable(e.to_string()))?;

        debug!(url = %config.url, namespace = %config.namespace, "Connected Redis session store");

        Ok(Self { conn, config })
    }

    /// Namespaced key for `session_id`; rejects identifiers that could escape the namespace.
    fn session_key(&self, session_id: &str) -> SessionResult<String> {
        if !is_well_formed_session_id(session_id) {
            return Err(SessionError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.config.session_key(session_id))
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.config.namespace, tag)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> SessionResult<Option<StoredSession>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.session_key(id)?).await?;

        match raw {
            Some(json) => {
                let entry: StoredSession = serde_json::from_str(&json)
                    .map_err(|e| SessionError::Deserialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        id: &str,
        payload: String,
        tags: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> SessionResult<()> {
        let key = self.session_key(id)?;
        let previous_tags = self
            .load(id)
            .await?
            .map(|entry| entry.tags)
            .unwrap_or_default();
        let mut conn = self.conn.clone();

        let entry = StoredSession {
            payload,
            tags: tags.to_vec(),
            expires_at,
        };
        let json =
            serde_json::to_string(&entry).map_err(|e| SessionError::Serialization(e.to_string()))?;

        // Entry and tag index go out in one MULTI so readers never see half a write.
        let mut pipe = redis::pipe();
        pipe.atomic();

        match expires_at {
            Some(expires_at) => {
                let remaining = (expires_at - Utc::now()).num_seconds();
                if remaining <= 0 {
                    pipe.del(&key).ignore();
                } else {
                    pipe.set_ex(&key, json, remaining as u64).ignore();
                }
            }
            None => {
                pipe.set(&key, json).ignore();
            }
        }

        for tag in tags {
            pipe.sadd(self.tag_key(tag), id).ignore();
        }
        for stale in previous_tags.iter().filter(|t| !tags.contains(*t)) {
            pipe.srem(self.tag_key(stale), id).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> SessionResult<()> {
        let key = self.session_key(id)?;
        let tags = self
            .load(id)
            .await?
            .map(|entry| entry.tags)
            .unwrap_or_default();

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key).ignore();
        for tag in &tags {
            pipe.srem(self.tag_key(tag), id).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn ids_with_tag(&self, tag: &str) -> SessionResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.tag_key(tag)).await?;

        // Entries expire natively; their tag memberships linger until removed.
        let mut ids = Vec::with_capacity(members.len());
        for id in members {
            let live: bool = conn.exists(self.session_key(&id)?).await?;
            if live {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn count(&self) -> SessionResult<usize> {
        let mut conn = self.conn.clone();
        let prefix = format!("{}:", self.config.namespace);

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", prefix))
            .query_async(&mut conn)
            .await?;

        // Identifiers never contain ':', tag index keys always do.
        Ok(keys
            .iter()
            .filter(|key| !key[prefix.len()..].contains(':'))
            .count())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
