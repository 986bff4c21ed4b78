//! The session entity.
//!
//! A [`Session`] owns one client's data map, tags and metadata. It talks to
//! its [`SessionStore`] only at lifecycle points: the resume check, resume
//! itself, flush and destroy. Every store call runs under the configured
//! timeout.
//!
//! # Resumption
//!
//! Resuming is split in two steps. [`Session::can_be_resumed`] loads the
//! persisted entry, verifies its checksum and expiry, and keeps the decoded
//! record for the following [`Session::resume`], which commits it into the
//! session without a second round trip.
//!
//! Note that `can_be_resumed` is a query with a side effect: besides caching
//! the record it removes an entry that turns out to be expired. Callers rely
//! on the cached record to avoid double I/O, so the two steps stay separate.

use crate::config::SessionConfig;
use crate::cookie::{CookieAttributes, Expiration};
use crate::error::{SessionError, SessionResult};
use crate::store::{SessionStore, bounded};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-session overrides applied at creation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Expiration policy (defaults to the configured one)
    pub expiration: Option<Expiration>,
    /// Cookie scope (defaults to the configured one)
    pub cookie: Option<CookieAttributes>,
}

impl SessionOptions {
    /// Expire the session `seconds` after it starts.
    pub fn with_maximum_age(mut self, seconds: i64) -> Self {
        self.expiration = Some(Expiration::maximum_age(seconds));
        self
    }

    /// Expire the session at a fixed instant.
    pub fn with_lifetime(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expiration = Some(Expiration::lifetime(expires_at));
        self
    }

    /// Scope the session cookie.
    pub fn with_cookie(mut self, cookie: CookieAttributes) -> Self {
        self.cookie = Some(cookie);
        self
    }
    /// Reject an out-of-range expiration override.
    pub fn validate(&self) -> SessionResult<()> {
        match &self.expiration {
            Some(expiration) => expiration.validate(),
            None => Ok(()),
        }
    }
}

/// Result of [`Session::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The record was written to the store
    Written,
    /// Nothing changed since the last write
    Unchanged,
    /// Not started or already destroyed; nothing to persist
    Skipped,
}

/// What the store holds for this session, as of the last write or load.
#[derive(Debug, Clone)]
struct Persisted {
    checksum: String,
    last_activity_at: DateTime<Utc>,
}

/// Persisted form of a session, borrowed for writing.
#[derive(Serialize)]
struct RecordRef<'a> {
    id: &'a str,
    name: &'a str,
    data: &'a BTreeMap<String, Value>,
    tags: &'a BTreeSet<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expiration: &'a Expiration,
    cookie: &'a CookieAttributes,
    checksum: &'a str,
}

/// Persisted form of a session, owned after reading.
#[derive(Debug, Deserialize)]
struct SessionRecord {
    id: String,
    name: String,
    data: BTreeMap<String, Value>,
    tags: BTreeSet<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expiration: Expiration,
    cookie: CookieAttributes,
    checksum: String,
}

impl SessionRecord {
    fn digest(&self) -> String {
        compute_checksum(
            &self.id,
            &self.name,
            &self.data,
            &self.tags,
            self.created_at,
            &self.expiration,
            &self.cookie,
        )
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expiration.expires_at(self.created_at)
    }
}

/// A single client's server-side state.
pub struct Session {
    id: String,
    name: String,
    data: BTreeMap<String, Value>,
    tags: BTreeSet<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    expiration: Expiration,
    cookie: CookieAttributes,
    started: bool,
    awaiting_resume: bool,
    checksum: Option<String>,
    persisted: Option<Persisted>,
    prefetched: Option<SessionRecord>,
    destroyed: Option<String>,
    store: Arc<dyn SessionStore>,
    store_timeout: Duration,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("started", &self.started)
            .field("tags", &self.tags)
            .field("created_at", &self.created_at)
            .field("last_activity_at", &self.last_activity_at)
            .field("expiration", &self.expiration)
            .field("destroyed", &self.destroyed)
            .field("store", &self.store.store_type())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a fresh, unstarted session under `id`.
    pub fn new(
        id: impl Into<String>,
        config: &SessionConfig,
        options: SessionOptions,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: config.session_name.clone(),
            data: BTreeMap::new(),
            tags: BTreeSet::new(),
            created_at: now,
            last_activity_at: now,
            expiration: options.expiration.unwrap_or(config.expiration),
            cookie: options.cookie.unwrap_or_else(|| config.cookie.clone()),
            started: false,
            awaiting_resume: false,
            checksum: None,
            persisted: None,
            prefetched: None,
            destroyed: None,
            store,
            store_timeout: config.store_timeout,
        }
    }

    /// Create a shell bound to an existing identifier, to be resumed from the store.
    ///
    /// A shell cannot be started fresh: the identifier came from the client.
    pub fn bound(id: impl Into<String>, config: &SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        let mut session = Self::new(id, config, SessionOptions::default(), store);
        session.awaiting_resume = true;
        session
    }

    // ========== Metadata ==========

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session name (the cookie name carrying the identifier).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Unix timestamp of the last request that used this session.
    pub fn last_activity_timestamp(&self) -> i64 {
        self.last_activity_at.timestamp()
    }

    /// Instant after which the session is expired.
    pub fn lifetime(&self) -> DateTime<Utc> {
        self.expires_at()
    }

    /// Relative TTL in seconds, if the session is governed by a maximum age.
    pub fn maximum_age(&self) -> Option<i64> {
        self.expiration.max_age_seconds()
    }

    pub fn expiration(&self) -> &Expiration {
        &self.expiration
    }

    pub fn domain(&self) -> Option<&str> {
        self.cookie.domain.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.cookie.path
    }

    pub fn is_secure(&self) -> bool {
        self.cookie.secure
    }

    pub fn is_http_only(&self) -> bool {
        self.cookie.http_only
    }

    pub fn cookie_attributes(&self) -> &CookieAttributes {
        &self.cookie
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expiration.expires_at(self.created_at)
    }

    /// Expired means the expiry instant is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.is_some()
    }

    /// Reason given to [`Session::destroy`], if destroyed.
    pub fn destroy_reason(&self) -> Option<&str> {
        self.destroyed.as_deref()
    }

    pub(crate) fn is_awaiting_resume(&self) -> bool {
        self.awaiting_resume
    }

    // ========== Activation ==========

    /// Start the session, if it has not been started already.
    pub fn start(&mut self) -> SessionResult<()> {
        self.start_at(Utc::now())
    }

    /// Start the session at `now`. Starting twice leaves the timestamps alone.
    pub fn start_at(&mut self, now: DateTime<Utc>) -> SessionResult<()> {
        self.ensure_usable()?;
        if self.started {
            return Ok(());
        }
        if self.awaiting_resume {
            return Err(SessionError::State(format!(
                "session {} is bound to a client identifier and must be resumed, not started",
                self.id
            )));
        }

        self.started = true;
        self.created_at = now;
        self.last_activity_at = now;
        self.checksum = None;
        debug!(session_id = %self.id, "Session started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // ========== Data ==========

    /// Raw value stored under `key`.
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Typed value stored under `key`; `None` if absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Store `value` under `key`, starting the session if needed.
    ///
    /// The checksum is refreshed lazily, at the next [`Session::checksum`] or flush.
    pub fn put_data(&mut self, key: impl Into<String>, value: Value) -> SessionResult<()> {
        self.ensure_active()?;
        self.data.insert(key.into(), value);
        self.checksum = None;
        Ok(())
    }

    /// Serialize and store `value` under `key`.
    pub fn put<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> SessionResult<()> {
        let value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.put_data(key, value)
    }

    /// Remove the value under `key`, returning it.
    pub fn remove_data(&mut self, key: &str) -> SessionResult<Option<Value>> {
        self.ensure_usable()?;
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.checksum = None;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.data.keys().map(String::as_str).collect()
    }

    // ========== Tags ==========

    /// Tag this session. Adding a tag twice keeps one copy.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> SessionResult<()> {
        self.ensure_active()?;
        if self.tags.insert(tag.into()) {
            self.checksum = None;
        }
        Ok(())
    }

    /// Remove a tag. Removing a tag the session does not carry is a no-op.
    pub fn remove_tag(&mut self, tag: &str) -> SessionResult<()> {
        self.ensure_usable()?;
        if self.tags.remove(tag) {
            self.checksum = None;
        }
        Ok(())
    }

    /// Tags in sorted order; empty if there are none.
    pub fn tags(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    // ========== Checksum ==========

    /// Digest over data, tags and identity metadata.
    ///
    /// Activity timestamps are excluded, so reading a session does not
    /// change its checksum.
    pub fn checksum(&mut self) -> String {
        if let Some(checksum) = &self.checksum {
            return checksum.clone();
        }

        let checksum = compute_checksum(
            &self.id,
            &self.name,
            &self.data,
            &self.tags,
            self.created_at,
            &self.expiration,
            &self.cookie,
        );
        self.checksum = Some(checksum.clone());
        checksum
    }

    // ========== Lifecycle ==========

    /// Whether a persisted, unexpired and intact entry exists for this session.
    ///
    /// Caches the loaded record for [`Session::resume`]. Store failures and
    /// corrupt payloads are logged and reported as "not resumable".
    pub async fn can_be_resumed(&mut self) -> bool {
        self.can_be_resumed_at(Utc::now()).await
    }

    /// [`Session::can_be_resumed`] evaluated at `now`.
    pub async fn can_be_resumed_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.destroyed.is_some() {
            return false;
        }

        if let Some(record) = &self.prefetched {
            return record.expires_at() > now;
        }

        let entry = match bounded("load", self.store_timeout, self.store.load(&self.id)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Session store failed during resume check");
                return false;
            }
        };

        let record = match decode_record(&self.id, &entry.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Discarding unreadable session payload");
                return false;
            }
        };

        if !entry.is_fresh_at(now) || record.expires_at() <= now {
            debug!(session_id = %self.id, "Persisted session expired");
            if let Err(e) = bounded("remove", self.store_timeout, self.store.remove(&self.id)).await {
                warn!(session_id = %self.id, error = %e, "Failed to remove expired session entry");
            }
            return false;
        }

        self.prefetched = Some(record);
        true
    }

    /// Resume the session cached by [`Session::can_be_resumed`].
    ///
    /// Returns the seconds of inactivity since the previous request.
    pub async fn resume(&mut self) -> SessionResult<i64> {
        self.resume_at(Utc::now()).await
    }

    /// [`Session::resume`] evaluated at `now`.
    pub async fn resume_at(&mut self, now: DateTime<Utc>) -> SessionResult<i64> {
        self.ensure_usable()?;

        let record = self.prefetched.take().ok_or_else(|| {
            SessionError::State(format!(
                "session {} cannot be resumed without a successful resume check",
                self.id
            ))
        })?;

        if record.expires_at() <= now {
            self.destroy("expired").await?;
            return Err(SessionError::Expired(self.id.clone()));
        }

        let inactivity = (now - record.last_activity_at).num_seconds().max(0);

        self.name = record.name;
        self.data = record.data;
        self.tags = record.tags;
        self.created_at = record.created_at;
        self.expiration = record.expiration;
        self.cookie = record.cookie;
        self.last_activity_at = now.max(record.last_activity_at);
        self.checksum = Some(record.checksum.clone());
        self.persisted = Some(Persisted {
            checksum: record.checksum,
            last_activity_at: record.last_activity_at,
        });
        self.started = true;
        self.awaiting_resume = false;

        debug!(session_id = %self.id, inactivity = inactivity, "Session resumed");
        Ok(inactivity)
    }

    /// Record activity by the current request on a resident session.
    pub(crate) fn touch_at(&mut self, now: DateTime<Utc>) -> i64 {
        let inactivity = (now - self.last_activity_at).num_seconds().max(0);
        self.last_activity_at = self.last_activity_at.max(now);
        inactivity
    }

    /// Destroy all session data and its store entry.
    ///
    /// Destroying twice is a no-op. Once destroyed the session rejects
    /// further writes; its identifier can only come back as a new session.
    pub async fn destroy(&mut self, reason: &str) -> SessionResult<()> {
        if self.destroyed.is_some() {
            return Ok(());
        }

        if self.persisted.is_some() || self.awaiting_resume {
            bounded("remove", self.store_timeout, self.store.remove(&self.id)).await?;
        }

        self.data.clear();
        self.tags.clear();
        self.prefetched = None;
        self.persisted = None;
        self.checksum = None;
        self.started = false;
        self.awaiting_resume = false;
        self.destroyed = Some(reason.to_string());

        debug!(session_id = %self.id, reason = %reason, "Session destroyed");
        Ok(())
    }

    /// Persist the session if its content or activity changed since the last write.
    ///
    /// The record goes to the store in a single `save`; a failed write is
    /// returned to the caller.
    pub async fn flush(&mut self) -> SessionResult<FlushOutcome> {
        if self.destroyed.is_some() || !self.started {
            return Ok(FlushOutcome::Skipped);
        }

        let checksum = self.checksum();
        let unchanged = self.persisted.as_ref().is_some_and(|p| {
            p.checksum == checksum && p.last_activity_at == self.last_activity_at
        });
        if unchanged {
            return Ok(FlushOutcome::Unchanged);
        }

        let record = RecordRef {
            id: &self.id,
            name: &self.name,
            data: &self.data,
            tags: &self.tags,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            expiration: &self.expiration,
            cookie: &self.cookie,
            checksum: &checksum,
        };
        let payload =
            serde_json::to_string(&record).map_err(|e| SessionError::Serialization(e.to_string()))?;
        let tags = self.tags();

        bounded(
            "save",
            self.store_timeout,
            self.store.save(&self.id, payload, &tags, Some(self.expires_at())),
        )
        .await?;

        self.persisted = Some(Persisted {
            checksum,
            last_activity_at: self.last_activity_at,
        });
        debug!(session_id = %self.id, "Session flushed");
        Ok(FlushOutcome::Written)
    }

    fn ensure_usable(&self) -> SessionResult<()> {
        match &self.destroyed {
            Some(reason) => Err(SessionError::State(format!(
                "session {} was destroyed ({})",
                self.id, reason
            ))),
            None => Ok(()),
        }
    }

    fn ensure_active(&mut self) -> SessionResult<()> {
        self.ensure_usable()?;
        if !self.started {
            self.start()?;
        }
        Ok(())
    }
}

fn decode_record(id: &str, payload: &str) -> SessionResult<SessionRecord> {
    let record: SessionRecord =
        serde_json::from_str(payload).map_err(|e| SessionError::Deserialization(e.to_string()))?;

    if record.id != id {
        return Err(SessionError::Corrupted(format!(
            "entry for {} carries identifier {}",
            id, record.id
        )));
    }
    if record.digest() != record.checksum {
        return Err(SessionError::Corrupted(format!("checksum mismatch for {}", id)));
    }
    Ok(record)
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn compute_checksum(
    id: &str,
    name: &str,
    data: &BTreeMap<String, Value>,
    tags: &BTreeSet<String>,
    created_at: DateTime<Utc>,
    expiration: &Expiration,
    cookie: &CookieAttributes,
) -> String {
    let mut hasher = Sha256::new();

    feed(&mut hasher, id.as_bytes());
    feed(&mut hasher, name.as_bytes());

    feed(&mut hasher, &(data.len() as u64).to_le_bytes());
    for (key, value) in data {
        feed(&mut hasher, key.as_bytes());
        feed(&mut hasher, value.to_string().as_bytes());
    }

    feed(&mut hasher, &(tags.len() as u64).to_le_bytes());
    for tag in tags {
        feed(&mut hasher, tag.as_bytes());
    }

    feed(
        &mut hasher,
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes(),
    );
    let policy = match expiration {
        Expiration::Lifetime { expires_at } => {
            format!("lifetime:{}", expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        }
        Expiration::MaximumAge { seconds } => format!("max-age:{}", seconds),
    };
    feed(&mut hasher, policy.as_bytes());

    feed(&mut hasher, cookie.domain.as_deref().unwrap_or("").as_bytes());
    feed(&mut hasher, cookie.path.as_bytes());
    feed(&mut hasher, &[cookie.domain.is_some() as u8, cookie.secure as u8, cookie.http_only as u8]);

    hex::encode(hasher.finalize())
}
