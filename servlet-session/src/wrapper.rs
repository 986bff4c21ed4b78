//! Request-scoped facade over a session.

use crate::error::{SessionError, SessionResult};
use crate::handle::SessionHandle;
use crate::manager::SessionManager;
use crate::session::SessionOptions;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Deferred resolution: which manager to ask and with which identifier.
struct Resolver {
    manager: Arc<SessionManager>,
    identifier: Option<String>,
}

/// What a request handler sees as "the session".
///
/// A wrapper is either bound explicitly through
/// [`SessionWrapper::inject_session`], or created by
/// [`SessionManager::wrapper_for`] and bound on first use: the request's
/// identifier is resolved, or a new session is created. Requests that never
/// touch their session never reach the store.
///
/// Every accessor locks the underlying session for the duration of the
/// call. Handlers that need several operations to be atomic should take
/// [`SessionWrapper::get_session`] and hold the lock themselves.
#[derive(Default)]
pub struct SessionWrapper {
    session: OnceCell<SessionHandle>,
    resolver: Option<Resolver>,
}

impl SessionWrapper {
    /// Unbound wrapper; accessors fail with [`SessionError::NoSessionBound`]
    /// until a session is injected.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deferred(manager: Arc<SessionManager>, identifier: Option<String>) -> Self {
        Self {
            session: OnceCell::new(),
            resolver: Some(Resolver {
                manager,
                identifier,
            }),
        }
    }

    /// Bind `session`, replacing any session bound before.
    pub fn inject_session(&mut self, session: SessionHandle) {
        self.session = OnceCell::new_with(Some(session));
    }

    /// The bound session, if any. Does not trigger resolution.
    pub fn get_session(&self) -> Option<SessionHandle> {
        self.session.get().cloned()
    }

    pub fn is_bound(&self) -> bool {
        self.session.initialized()
    }

    async fn session(&self) -> SessionResult<&SessionHandle> {
        if let Some(handle) = self.session.get() {
            return Ok(handle);
        }

        let resolver = self.resolver.as_ref().ok_or(SessionError::NoSessionBound)?;
        self.session
            .get_or_try_init(|| {
                resolver
                    .manager
                    .resolve_or_create(resolver.identifier.as_deref(), SessionOptions::default())
            })
            .await
    }

    // ========== Lifecycle ==========

    pub async fn start(&self) -> SessionResult<()> {
        self.session().await?.lock().await.start()
    }

    pub async fn is_started(&self) -> SessionResult<bool> {
        Ok(self.session().await?.lock().await.is_started())
    }

    pub async fn can_be_resumed(&self) -> SessionResult<bool> {
        Ok(self.session().await?.lock().await.can_be_resumed().await)
    }

    pub async fn resume(&self) -> SessionResult<i64> {
        self.session().await?.lock().await.resume().await
    }

    pub async fn destroy(&self, reason: &str) -> SessionResult<()> {
        self.session().await?.lock().await.destroy(reason).await
    }

    pub async fn checksum(&self) -> SessionResult<String> {
        Ok(self.session().await?.lock().await.checksum())
    }

    // ========== Metadata ==========

    pub async fn id(&self) -> SessionResult<String> {
        Ok(self.session().await?.id().to_string())
    }

    pub async fn name(&self) -> SessionResult<String> {
        Ok(self.session().await?.lock().await.name().to_string())
    }

    pub async fn last_activity_timestamp(&self) -> SessionResult<i64> {
        Ok(self.session().await?.lock().await.last_activity_timestamp())
    }

    /// Unix timestamp after which the session is expired.
    pub async fn lifetime(&self) -> SessionResult<i64> {
        Ok(self.session().await?.lock().await.lifetime().timestamp())
    }

    pub async fn maximum_age(&self) -> SessionResult<Option<i64>> {
        Ok(self.session().await?.lock().await.maximum_age())
    }

    pub async fn domain(&self) -> SessionResult<Option<String>> {
        Ok(self.session().await?.lock().await.domain().map(str::to_string))
    }

    pub async fn path(&self) -> SessionResult<String> {
        Ok(self.session().await?.lock().await.path().to_string())
    }

    pub async fn is_secure(&self) -> SessionResult<bool> {
        Ok(self.session().await?.lock().await.is_secure())
    }

    pub async fn is_http_only(&self) -> SessionResult<bool> {
        Ok(self.session().await?.lock().await.is_http_only())
    }

    // ========== Data ==========

    pub async fn get_data(&self, key: &str) -> SessionResult<Option<Value>> {
        Ok(self.session().await?.lock().await.get_data(key).cloned())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> SessionResult<Option<T>> {
        Ok(self.session().await?.lock().await.get(key))
    }

    pub async fn has_key(&self, key: &str) -> SessionResult<bool> {
        Ok(self.session().await?.lock().await.has_key(key))
    }

    pub async fn put_data(&self, key: &str, value: Value) -> SessionResult<()> {
        self.session().await?.lock().await.put_data(key, value)
    }

    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SessionResult<()> {
        self.session().await?.lock().await.put(key, value)
    }

    pub async fn remove_data(&self, key: &str) -> SessionResult<Option<Value>> {
        self.session().await?.lock().await.remove_data(key)
    }

    // ========== Tags ==========

    pub async fn add_tag(&self, tag: &str) -> SessionResult<()> {
        self.session().await?.lock().await.add_tag(tag)
    }

    pub async fn remove_tag(&self, tag: &str) -> SessionResult<()> {
        self.session().await?.lock().await.remove_tag(tag)
    }

    pub async fn tags(&self) -> SessionResult<Vec<String>> {
        Ok(self.session().await?.lock().await.tags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::cookie::CookieAttributes;
    use crate::session::Session;
    use serde_json::json;

    #[tokio::test]
    async fn test_unbound_wrapper_fails() {
        let wrapper = SessionWrapper::new();

        assert!(!wrapper.is_bound());
        assert!(matches!(wrapper.get_data("k").await, Err(SessionError::NoSessionBound)));
        assert!(matches!(wrapper.put_data("k", json!(1)).await, Err(SessionError::NoSessionBound)));
        assert!(matches!(wrapper.id().await, Err(SessionError::NoSessionBound)));
        assert!(matches!(wrapper.tags().await, Err(SessionError::NoSessionBound)));
        assert!(matches!(wrapper.destroy("x").await, Err(SessionError::NoSessionBound)));
        assert!(wrapper.get_session().is_none());
    }

    #[tokio::test]
    async fn test_injected_session_is_forwarded() {
        let manager = SessionManager::in_memory(SessionConfig::memory()).unwrap();
        let handle = manager.create_session(SessionOptions::default()).await.unwrap();

        let mut wrapper = SessionWrapper::new();
        wrapper.inject_session(handle.clone());

        wrapper.put("count", &1).await.unwrap();
        wrapper.add_tag("A").await.unwrap();

        assert_eq!(wrapper.id().await.unwrap(), handle.id());
        assert_eq!(wrapper.get::<i32>("count").await.unwrap(), Some(1));
        assert!(wrapper.is_started().await.unwrap());
        assert_eq!(wrapper.tags().await.unwrap(), vec!["A".to_string()]);
        assert_eq!(wrapper.name().await.unwrap(), "SESSID");
        assert_eq!(wrapper.path().await.unwrap(), "/");
        assert!(wrapper.is_http_only().await.unwrap());
        assert!(handle.lock().await.has_key("count"));
    }

    #[tokio::test]
    async fn test_lifecycle_and_metadata_are_forwarded() {
        let config = SessionConfig::memory()
            .with_maximum_age(60)
            .with_cookie(CookieAttributes::default().with_secure(true));
        let manager = SessionManager::in_memory(config).unwrap();

        let id = {
            let handle = manager.create_session(SessionOptions::default()).await.unwrap();
            let mut session = handle.lock().await;
            session.put_data("k", json!("v")).unwrap();
            session.flush().await.unwrap();
            handle.id().to_string()
        };

        let shell = SessionHandle::new(Session::bound(id, manager.config(), manager.store().clone()));
        let mut wrapper = SessionWrapper::new();
        wrapper.inject_session(shell.clone());

        assert!(wrapper.can_be_resumed().await.unwrap());
        assert!(wrapper.resume().await.unwrap() >= 0);
        assert_eq!(wrapper.get_data("k").await.unwrap(), Some(json!("v")));

        let mut session = shell.lock().await;
        let (checksum, lifetime, last_activity) = (
            session.checksum(),
            session.lifetime().timestamp(),
            session.last_activity_timestamp(),
        );
        drop(session);

        assert_eq!(wrapper.checksum().await.unwrap(), checksum);
        assert_eq!(wrapper.lifetime().await.unwrap(), lifetime);
        assert_eq!(wrapper.last_activity_timestamp().await.unwrap(), last_activity);
        assert_eq!(wrapper.maximum_age().await.unwrap(), Some(60));
        assert!(wrapper.is_secure().await.unwrap());

        // the cached record is consumed by the first resume
        assert!(matches!(wrapper.resume().await, Err(SessionError::State(_))));
    }

    #[tokio::test]
    async fn test_deferred_wrapper_creates_on_first_use() {
        let manager = Arc::new(SessionManager::in_memory(SessionConfig::memory()).unwrap());
        let wrapper = SessionWrapper::deferred(manager.clone(), None);

        assert!(!wrapper.is_bound());
        assert_eq!(manager.resident_count(), 0);

        wrapper.put_data("k", json!("v")).await.unwrap();
        assert!(wrapper.is_bound());
        assert_eq!(manager.resident_count(), 1);

        let id = wrapper.id().await.unwrap();
        assert!(manager.resident(&id).is_some());
    }
}
