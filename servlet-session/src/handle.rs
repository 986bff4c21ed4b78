//! Shared, lockable reference to a resident session.

use crate::session::Session;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Handle to a session owned by the [`SessionManager`](crate::SessionManager).
///
/// The mutex is the per-identifier lock: resume, mutation, flush and
/// expiry of one session are serialized through it, while different
/// sessions never contend. The identifier is immutable and readable
/// without taking the lock.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            id: Arc::from(session.id()),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    /// Exclusive access if nobody else holds the session right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Session>> {
        self.inner.try_lock().ok()
    }

    /// Whether both handles point at the same resident session.
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}
