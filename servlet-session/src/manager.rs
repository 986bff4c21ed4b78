//! Session creation, resolution and expiry.

use crate::config::{SessionBackend, SessionConfig};
use crate::cookie::SessionCookie;
use crate::error::{SessionError, SessionResult};
use crate::handle::SessionHandle;
use crate::http::{SessionRequest, SessionResponse};
use crate::id::{generate_session_id, is_well_formed_session_id};
use crate::session::{Session, SessionOptions};
use crate::store::{MemorySessionStore, SessionStore, bounded};
use crate::wrapper::SessionWrapper;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "redis")]
use crate::store::RedisSessionStore;

/// Produces candidate session identifiers.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Owns the resident session table and drives the session lifecycle.
///
/// The table maps identifiers to [`SessionHandle`]s. It is sharded, so
/// requests for different sessions never wait on each other; requests for
/// the same session serialize on that session's handle.
///
/// # Examples
///
/// ```
/// use servlet_session::{SessionConfig, SessionManager, SessionOptions};
///
/// # async fn example() -> servlet_session::SessionResult<()> {
/// let manager = SessionManager::in_memory(SessionConfig::memory())?;
///
/// let handle = manager.create_session(SessionOptions::default()).await?;
/// {
///     let mut session = handle.lock().await;
///     session.put("user_id", &42)?;
///     session.flush().await?;
/// }
///
/// let resolved = manager.resolve(handle.id()).await;
/// assert!(resolved.is_some());
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    sessions: DashMap<String, SessionHandle>,
    id_generator: IdGenerator,
    last_sweep_ms: AtomicI64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweeper_shutdown: Arc<Notify>,
}

impl SessionManager {
    /// Create a manager over an existing store.
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> SessionResult<Self> {
        config.validate()?;
        debug!(
            store = store.store_type(),
            session_name = %config.session_name,
            "Creating session manager"
        );

        Ok(Self {
            config,
            store,
            sessions: DashMap::new(),
            id_generator: Arc::new(generate_session_id),
            last_sweep_ms: AtomicI64::new(0),
            sweeper: Mutex::new(None),
            sweeper_shutdown: Arc::new(Notify::new()),
        })
    }

    /// Create a manager backed by a fresh [`MemorySessionStore`].
    pub fn in_memory(config: SessionConfig) -> SessionResult<Self> {
        Self::new(config, Arc::new(MemorySessionStore::new()))
    }

    /// Create a manager with the store selected by `config.backend`.
    pub async fn from_config(config: SessionConfig) -> SessionResult<Self> {
        let store: Arc<dyn SessionStore> = match config.backend {
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
            #[cfg(feature = "redis")]
            SessionBackend::Redis => Arc::new(RedisSessionStore::new(config.clone()).await?),
            #[cfg(not(feature = "redis"))]
            SessionBackend::Redis => {
                return Err(SessionError::Config(
                    "the redis backend requires the `redis` feature".to_string(),
                ));
            }
        };
        Self::new(config, store)
    }

    /// Replace the identifier generator.
    pub fn with_id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.id_generator = Arc::new(generator);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Number of sessions currently held in memory.
    pub fn resident_count(&self) -> usize {
        self.sessions.len()
    }

    /// The resident session under `id`, without touching the store.
    pub fn resident(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    // ========== Creation ==========

    /// Create a new, unstarted session under a fresh identifier.
    ///
    /// A candidate identifier is regenerated when it collides with a
    /// resident session or a live store entry, up to
    /// `config.id_generation_attempts` times.
    pub async fn create_session(&self, options: SessionOptions) -> SessionResult<SessionHandle> {
        options.validate()?;
        let attempts = self.config.id_generation_attempts;

        for attempt in 1..=attempts {
            let id = (self.id_generator)();
            if !is_well_formed_session_id(&id) {
                warn!(attempt = attempt, "Generated session identifier is malformed");
                continue;
            }
            if self.sessions.contains_key(&id) {
                debug!(attempt = attempt, "Session identifier collided with a resident session");
                continue;
            }

            let taken = bounded(
                "exists",
                self.config.store_timeout,
                self.store.exists_and_fresh(&id, Utc::now()),
            )
            .await;
            match taken {
                Ok(true) => {
                    debug!(attempt = attempt, "Session identifier collided with a stored session");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Could not check session identifier against the store");
                }
            }

            let handle = SessionHandle::new(Session::new(
                id.clone(),
                &self.config,
                options.clone(),
                self.store.clone(),
            ));

            match self.sessions.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(handle.clone());
                    debug!(session_id = %handle.id(), "Session created");
                    return Ok(handle);
                }
            }
        }

        error!(attempts = attempts, "Session identifier space exhausted");
        Err(SessionError::IdentifierSpaceExhausted { attempts })
    }

    // ========== Resolution ==========

    /// Resolve an identifier from a client to a live session.
    ///
    /// Returns `None` for malformed identifiers, unknown or expired
    /// sessions, and when the store cannot be read; the caller then
    /// creates a fresh session.
    pub async fn resolve(&self, identifier: &str) -> Option<SessionHandle> {
        self.resolve_at(identifier, Utc::now()).await
    }

    /// [`SessionManager::resolve`] evaluated at `now`.
    pub async fn resolve_at(&self, identifier: &str, now: DateTime<Utc>) -> Option<SessionHandle> {
        if !is_well_formed_session_id(identifier) {
            debug!("Ignoring malformed session identifier");
            return None;
        }

        if self.config.sweep_on_resolve {
            self.maybe_sweep(now).await;
        }

        loop {
            // One resident copy per identifier: concurrent resolvers share the shell.
            let handle = self
                .sessions
                .entry(identifier.to_string())
                .or_insert_with(|| {
                    SessionHandle::new(Session::bound(identifier, &self.config, self.store.clone()))
                })
                .value()
                .clone();

            let mut session = handle.lock().await;

            // A resolver ahead of us evicted this handle while we waited.
            if !self.is_resident(&handle) {
                trace!(session_id = %identifier, "Resident session replaced while waiting, retrying");
                continue;
            }

            if session.is_destroyed() {
                drop(session);
                self.evict(&handle);
                return None;
            }

            if session.is_awaiting_resume() {
                if !session.can_be_resumed_at(now).await {
                    drop(session);
                    self.evict(&handle);
                    return None;
                }

                match session.resume_at(now).await {
                    Ok(inactivity) => {
                        debug!(session_id = %identifier, inactivity = inactivity, "Resolved session from store");
                    }
                    Err(e) => {
                        debug!(session_id = %identifier, error = %e, "Session could not be resumed");
                        drop(session);
                        self.evict(&handle);
                        return None;
                    }
                }
            } else if session.is_expired_at(now) {
                if let Err(e) = session.destroy("expired").await {
                    warn!(session_id = %identifier, error = %e, "Failed to destroy expired session");
                }
                drop(session);
                self.evict(&handle);
                return None;
            } else if session.is_started() {
                let inactivity = session.touch_at(now);
                trace!(session_id = %identifier, inactivity = inactivity, "Resolved resident session");
            }

            drop(session);
            return Some(handle);
        }
    }

    /// Resolve `identifier` if given and live, else create a new session.
    pub async fn resolve_or_create(
        &self,
        identifier: Option<&str>,
        options: SessionOptions,
    ) -> SessionResult<SessionHandle> {
        if let Some(identifier) = identifier {
            if let Some(handle) = self.resolve(identifier).await {
                return Ok(handle);
            }
        }
        self.create_session(options).await
    }

    // ========== Expiry ==========

    /// Destroy every resident session whose expiry instant is at or before `now`.
    ///
    /// Sessions locked by an in-flight request are skipped and picked up by
    /// a later sweep. Returns the number of sessions destroyed.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut expired = 0;
        for handle in handles {
            let Some(mut session) = handle.try_lock() else {
                continue;
            };

            if session.is_destroyed() {
                drop(session);
                self.evict(&handle);
                continue;
            }
            if session.is_awaiting_resume() || !session.is_expired_at(now) {
                continue;
            }

            match session.destroy("expired").await {
                Ok(()) => {
                    expired += 1;
                    drop(session);
                    self.evict(&handle);
                }
                Err(e) => {
                    warn!(session_id = %handle.id(), error = %e, "Failed to destroy expired session");
                }
            }
        }

        match bounded(
            "cleanup",
            self.config.store_timeout,
            self.store.cleanup_expired(now),
        )
        .await
        {
            Ok(purged) if purged > 0 => debug!(purged = purged, "Store dropped expired entries"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Store cleanup failed"),
        }

        if expired > 0 {
            info!(expired = expired, resident = self.sessions.len(), "Expired sessions swept");
        }
        expired
    }

    /// Sweep at most once per `sweep_interval`.
    async fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let interval_ms = i64::try_from(self.config.sweep_interval.as_millis()).unwrap_or(i64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Acquire);

        if now_ms.saturating_sub(last) < interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.expire_sweep(now).await;
        }
    }

    /// Destroy every session carrying `tag`, resident or only persisted.
    pub async fn destroy_by_tag(&self, tag: &str, reason: &str) -> SessionResult<usize> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut destroyed = 0;
        for handle in handles {
            let mut session = handle.lock().await;
            if session.is_destroyed() || !session.has_tag(tag) {
                continue;
            }
            session.destroy(reason).await?;
            destroyed += 1;
            drop(session);
            self.evict(&handle);
        }

        let ids = bounded(
            "ids_with_tag",
            self.config.store_timeout,
            self.store.ids_with_tag(tag),
        )
        .await?;
        for id in ids {
            if self.sessions.contains_key(&id) {
                continue;
            }
            bounded("remove", self.config.store_timeout, self.store.remove(&id)).await?;
            destroyed += 1;
        }

        debug!(tag = %tag, reason = %reason, destroyed = destroyed, "Destroyed sessions by tag");
        Ok(destroyed)
    }

    /// Start sweeping expired sessions every `sweep_interval`.
    ///
    /// The task holds a weak reference and ends once the manager is dropped.
    pub async fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().await;
        if slot.is_some() {
            return;
        }

        let manager = Arc::downgrade(self);
        let shutdown = self.sweeper_shutdown.clone();
        let period = self.config.sweep_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.notified() => break,
                }

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.expire_sweep(Utc::now()).await;
            }

            debug!("Session sweeper stopped");
        }));
        info!(interval = ?period, "Session sweeper started");
    }

    /// Stop the background sweeper, letting a sweep in progress finish.
    pub async fn stop_sweeper(&self) {
        let task = self.sweeper.lock().await.take();
        if let Some(task) = task {
            self.sweeper_shutdown.notify_one();
            if let Err(e) = task.await {
                warn!(error = %e, "Session sweeper task failed");
            }
        }
    }

    // ========== Request integration ==========

    /// Identifier carried by the request, from the session cookie or the configured header.
    pub fn session_identifier(&self, request: &impl SessionRequest) -> Option<String> {
        let name = &self.config.session_name;
        let from_cookie = if request.has_cookie(name) {
            request.cookie(name)
        } else {
            None
        };

        from_cookie
            .or_else(|| {
                self.config
                    .header_name
                    .as_deref()
                    .and_then(|header| request.header(header))
            })
            .filter(|id| !id.is_empty())
    }

    /// Per-request wrapper that resolves or creates its session on first use.
    pub fn wrapper_for(self: &Arc<Self>, request: &impl SessionRequest) -> SessionWrapper {
        SessionWrapper::deferred(self.clone(), self.session_identifier(request))
    }

    /// Flush the request's session and hand its cookie to the response.
    ///
    /// Does nothing if the request never touched its session. A failed
    /// write is returned so the request fails instead of losing data.
    pub async fn finalize(
        &self,
        wrapper: &SessionWrapper,
        response: &mut impl SessionResponse,
    ) -> SessionResult<()> {
        let Some(handle) = wrapper.get_session() else {
            return Ok(());
        };

        let mut session = handle.lock().await;

        if session.is_destroyed() {
            let cookie = SessionCookie::removal(session.name(), session.cookie_attributes());
            drop(session);
            self.evict(&handle);
            response.add_cookie(cookie);
            return Ok(());
        }

        let outcome = session.flush().await?;
        trace!(session_id = %handle.id(), outcome = ?outcome, "Session finalized");

        if session.is_started() && !response.has_cookie(session.name()) {
            response.add_cookie(SessionCookie::for_session(
                session.name(),
                session.id(),
                session.cookie_attributes(),
                session.expiration(),
                session.created_at(),
                Utc::now(),
            ));
        }
        Ok(())
    }

    fn is_resident(&self, handle: &SessionHandle) -> bool {
        self.sessions
            .get(handle.id())
            .is_some_and(|current| current.ptr_eq(handle))
    }

    /// Drop `handle` from the table unless its slot has been reused.
    fn evict(&self, handle: &SessionHandle) {
        self.sessions
            .remove_if(handle.id(), |_, current| current.ptr_eq(handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use crate::store::StoredSession;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    /// Memory store whose first load fails after a delay.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySessionStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn load(&self, id: &str) -> SessionResult<Option<StoredSession>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(SessionError::StoreUnavailable("connection reset".to_string()));
            }
            self.inner.load(id).await
        }

        async fn save(
            &self,
            id: &str,
            payload: String,
            tags: &[String],
            expires_at: Option<DateTime<Utc>>,
        ) -> SessionResult<()> {
            self.inner.save(id, payload, tags, expires_at).await
        }

        async fn remove(&self, id: &str) -> SessionResult<()> {
            self.inner.remove(id).await
        }

        async fn exists_and_fresh(&self, id: &str, now: DateTime<Utc>) -> SessionResult<bool> {
            self.inner.exists_and_fresh(id, now).await
        }

        async fn ids_with_tag(&self, tag: &str) -> SessionResult<Vec<String>> {
            self.inner.ids_with_tag(tag).await
        }

        async fn count(&self) -> SessionResult<usize> {
            self.inner.count().await
        }

        fn store_type(&self) -> &'static str {
            "flaky"
        }
    }

    fn manager() -> SessionManager {
        SessionManager::in_memory(SessionConfig::memory().with_maximum_age(60)).unwrap()
    }

    #[tokio::test]
    async fn test_create_session_is_unstarted_and_resident() {
        let manager = manager();
        let handle = manager.create_session(SessionOptions::default()).await.unwrap();

        assert!(is_well_formed_session_id(handle.id()));
        assert!(!handle.lock().await.is_started());
        assert_eq!(manager.resident_count(), 1);
        assert!(manager.resident(handle.id()).unwrap().ptr_eq(&handle));
    }

    #[tokio::test]
    async fn test_create_session_applies_options() {
        let manager = manager();
        let options = SessionOptions::default().with_maximum_age(10);
        let handle = manager.create_session(options).await.unwrap();

        assert_eq!(handle.lock().await.maximum_age(), Some(10));
    }

    #[tokio::test]
    async fn test_out_of_range_maximum_age_is_rejected() {
        let result = SessionManager::in_memory(SessionConfig::memory().with_maximum_age(i64::MAX / 1000));
        assert!(matches!(result, Err(SessionError::Config(_))));

        let manager = manager();
        let options = SessionOptions::default().with_maximum_age(i64::MAX / 1000);
        let err = manager.create_session(options).await.unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        assert_eq!(manager.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_identifier_regeneration_then_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = manager().with_id_generator(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "fixed-id".to_string()
        });

        manager.create_session(SessionOptions::default()).await.unwrap();
        let err = manager.create_session(SessionOptions::default()).await.unwrap_err();

        assert!(matches!(err, SessionError::IdentifierSpaceExhausted { attempts: 5 }));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_identifiers() {
        let manager = manager();
        assert!(manager.resolve("").await.is_none());
        assert!(manager.resolve("not a valid id").await.is_none());
        assert!(manager.resolve("ns:injected").await.is_none());
        assert_eq!(manager.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_identifier_leaves_no_shell() {
        let manager = manager();
        assert!(manager.resolve("deadbeef").await.is_none());
        assert_eq!(manager.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_returns_resident_copy() {
        let manager = manager();
        let handle = manager.create_session(SessionOptions::default()).await.unwrap();
        handle.lock().await.put_data("k", json!(1)).unwrap();

        let resolved = manager.resolve(handle.id()).await.unwrap();
        assert!(resolved.ptr_eq(&handle));
    }

    #[tokio::test]
    async fn test_resolve_expired_resident_destroys_it() {
        let manager = manager();
        let handle = manager.create_session(SessionOptions::default()).await.unwrap();
        let started = Utc::now();
        {
            let mut session = handle.lock().await;
            session.start_at(started).unwrap();
            session.flush().await.unwrap();
        }

        let resolved = manager
            .resolve_at(handle.id(), started + ChronoDuration::seconds(61))
            .await;

        assert!(resolved.is_none());
        assert!(handle.lock().await.is_destroyed());
        assert_eq!(manager.resident_count(), 0);
        assert_eq!(manager.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_load_never_leaves_two_copies() {
        let store = Arc::new(FlakyStore::default());
        let config = SessionConfig::memory().with_maximum_age(60);

        let id = {
            let writer = SessionManager::new(config.clone(), store.clone()).unwrap();
            let handle = writer.create_session(SessionOptions::default()).await.unwrap();
            let mut session = handle.lock().await;
            session.put_data("k", json!(1)).unwrap();
            session.flush().await.unwrap();
            handle.id().to_string()
        };

        let manager = SessionManager::new(config, store).unwrap();
        let (first, second) = tokio::join!(manager.resolve(&id), manager.resolve(&id));
        let third = manager.resolve(&id).await.unwrap();

        let resident = manager.resident(&id).unwrap();
        assert!(resident.ptr_eq(&third));
        for handle in [first, second].into_iter().flatten() {
            assert!(handle.ptr_eq(&resident));
        }
        assert_eq!(manager.resident_count(), 1);
        assert_eq!(third.lock().await.get_data("k").cloned(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_expire_sweep_destroys_only_expired() {
        let manager = manager();
        let now = Utc::now();

        let old = manager.create_session(SessionOptions::default()).await.unwrap();
        old.lock().await.start_at(now - ChronoDuration::seconds(120)).unwrap();
        let fresh = manager.create_session(SessionOptions::default()).await.unwrap();
        fresh.lock().await.start_at(now).unwrap();

        assert_eq!(manager.expire_sweep(now).await, 1);
        assert!(old.lock().await.is_destroyed());
        assert!(!fresh.lock().await.is_destroyed());
        assert_eq!(manager.resident_count(), 1);
    }

    #[tokio::test]
    async fn test_expire_sweep_skips_locked_sessions() {
        let manager = manager();
        let now = Utc::now();

        let handle = manager.create_session(SessionOptions::default()).await.unwrap();
        let mut guard = handle.lock().await;
        guard.start_at(now - ChronoDuration::seconds(120)).unwrap();

        assert_eq!(manager.expire_sweep(now).await, 0);
        assert!(!guard.is_destroyed());
        drop(guard);

        assert_eq!(manager.expire_sweep(now).await, 1);
    }

    #[tokio::test]
    async fn test_destroy_by_tag() {
        let manager = manager();

        let tagged = manager.create_session(SessionOptions::default()).await.unwrap();
        {
            let mut session = tagged.lock().await;
            session.add_tag("premium").unwrap();
            session.flush().await.unwrap();
        }
        let other = manager.create_session(SessionOptions::default()).await.unwrap();
        other.lock().await.add_tag("basic").unwrap();

        assert_eq!(manager.destroy_by_tag("premium", "plan changed").await.unwrap(), 1);
        assert_eq!(tagged.lock().await.destroy_reason(), Some("plan changed"));
        assert!(!other.lock().await.is_destroyed());
        assert_eq!(manager.resident_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = SessionManager::in_memory(SessionConfig::memory().with_id_generation_attempts(0));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_requires_feature() {
        let config = SessionConfig::redis("redis://127.0.0.1:1").unwrap();
        let result = SessionManager::from_config(config).await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
