// Servlet Engine - server-side session lifecycle for stateless HTTP handlers
//
// This library tracks per-client state across requests: sessions are created
// on demand, resumed from a pluggable store, checksummed, tagged and expired.

// Re-export the session engine
pub use servlet_session::*;

// Re-export logging setup
pub use servlet_log as log;

// Re-export for implementing `SessionStore` and handling session values
pub use async_trait::async_trait;
pub use serde_json::{Value, json};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CookieAttributes,
        Expiration,
        FlushOutcome,
        MemorySessionStore,
        Session,
        SessionConfig,
        SessionCookie,
        SessionError,
        SessionHandle,
        SessionManager,
        SessionOptions,
        // HTTP seams
        SessionRequest,
        SessionResponse,
        SessionResult,
        SessionStore,
        SessionWrapper,
        StoredSession,
        async_trait,
        json,
    };
}
