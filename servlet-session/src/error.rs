//! Error types for session operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A wrapper was used before any session was injected into it
    #[error("No session bound to this wrapper")]
    NoSessionBound,

    /// Operation not allowed in the session's current lifecycle state
    #[error("Invalid session state: {0}")]
    State(String),

    /// Session expired while being resumed
    #[error("Session expired: {0}")]
    Expired(String),

    /// Every generated identifier collided with a live one
    #[error("Session identifier space exhausted after {attempts} attempts")]
    IdentifierSpaceExhausted {
        /// Number of identifiers generated before giving up
        attempts: u32,
    },

    /// Store round trip exceeded the configured bound
    #[error("Session store {operation} timed out after {timeout:?}")]
    StoreTimeout {
        /// Store operation that timed out
        operation: &'static str,
        /// Configured bound
        timeout: Duration,
    },

    /// Store reported a failure
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Persisted payload failed checksum verification
    #[error("Session payload corrupted: {0}")]
    Corrupted(String),

    /// Invalid session ID
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl SessionError {
    /// Whether the error came from the backing store rather than the session itself.
    pub fn is_store_failure(&self) -> bool {
        match self {
            SessionError::StoreTimeout { .. } | SessionError::StoreUnavailable(_) => true,
            #[cfg(feature = "redis")]
            SessionError::Redis(_) => true,
            _ => false,
        }
    }
}
