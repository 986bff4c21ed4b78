//! Session lifecycle engine for servlet-style request handlers.
//!
//! Tracks per-client state across stateless HTTP requests: sessions are
//! created on demand, resumed from a [`SessionStore`] when a request carries
//! an identifier, checksummed so unchanged sessions are not rewritten,
//! tagged for bulk invalidation and expired either at a fixed instant or
//! after a maximum age.
//!
//! # Pieces
//!
//! - [`Session`] - one client's data map, tags and metadata
//! - [`SessionManager`] - resident session table; creation, resolution and expiry
//! - [`SessionWrapper`] - what a request handler sees as "the session"
//! - [`SessionStore`] - persistence seam, with [`MemorySessionStore`] built in
//!
//! # Concurrency
//!
//! At most one resident copy exists per identifier. Concurrent requests for
//! the same session serialize on its [`SessionHandle`]; requests for
//! different sessions proceed in parallel. Every store call is bounded by
//! [`SessionConfig::store_timeout`].
//!
//! # Resumption side effect
//!
//! [`Session::can_be_resumed`] is not a pure query. It caches the loaded
//! record for the following [`Session::resume`] and removes a store entry
//! it finds expired.
//!
//! # Features
//!
//! - `redis` - Redis session storage via [`RedisSessionStore`]
//!
//! # Examples
//!
//! ```
//! use servlet_session::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let manager = Arc::new(SessionManager::in_memory(
//!         SessionConfig::memory().with_maximum_age(3600),
//!     )?);
//!
//!     // First request: no identifier, a session is created on first write.
//!     let handle = manager.resolve_or_create(None, SessionOptions::default()).await?;
//!     let mut wrapper = SessionWrapper::new();
//!     wrapper.inject_session(handle.clone());
//!
//!     wrapper.put("user_id", &123).await?;
//!     wrapper.add_tag("user:123").await?;
//!     handle.lock().await.flush().await?;
//!
//!     // Later request carrying the identifier.
//!     let resumed = manager.resolve(handle.id()).await.expect("live session");
//!     let user_id: Option<i32> = resumed.lock().await.get("user_id");
//!     assert_eq!(user_id, Some(123));
//!
//!     // Log out everywhere.
//!     manager.destroy_by_tag("user:123", "logout").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookie;
pub mod error;
pub mod handle;
pub mod http;
pub mod id;
pub mod manager;
pub mod session;
pub mod store;
pub mod wrapper;

pub use config::{SessionBackend, SessionConfig};
pub use cookie::{CookieAttributes, Expiration, MAX_MAXIMUM_AGE_SECS, SessionCookie};
pub use error::{SessionError, SessionResult};
pub use handle::SessionHandle;
pub use http::{SessionRequest, SessionResponse};
pub use id::{generate_session_id, is_well_formed_session_id};
pub use manager::{IdGenerator, SessionManager};
pub use session::{FlushOutcome, Session, SessionOptions};
pub use store::{MemorySessionStore, SessionStore, StoredSession};
pub use wrapper::SessionWrapper;

#[cfg(feature = "redis")]
pub use store::RedisSessionStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{SessionBackend, SessionConfig};
    pub use crate::cookie::{CookieAttributes, Expiration, SessionCookie};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::handle::SessionHandle;
    pub use crate::http::{SessionRequest, SessionResponse};
    pub use crate::manager::SessionManager;
    pub use crate::session::{FlushOutcome, Session, SessionOptions};
    pub use crate::store::{MemorySessionStore, SessionStore};
    pub use crate::wrapper::SessionWrapper;

    #[cfg(feature = "redis")]
    pub use crate::store::RedisSessionStore;
}
