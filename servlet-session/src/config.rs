//! Session configuration.

use crate::cookie::{CookieAttributes, Expiration};
use crate::error::{SessionError, SessionResult};
use std::env;
use std::time::Duration;

/// Session backend type.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionBackend {
    /// In-process memory
    Memory,
    /// Redis backend
    Redis,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend type
    pub backend: SessionBackend,
    /// Connection URL (unused by the memory backend)
    pub url: String,
    /// Cookie name carrying the session identifier
    pub session_name: String,
    /// Header consulted when the request carries no session cookie
    pub header_name: Option<String>,
    /// Session namespace/prefix
    pub namespace: String,
    /// Expiration policy applied to new sessions
    pub expiration: Expiration,
    /// Cookie scope applied to new sessions
    pub cookie: CookieAttributes,
    /// Upper bound on every store round trip
    pub store_timeout: Duration,
    /// Period of the background expiration sweep
    pub sweep_interval: Duration,
    /// Run a (throttled) sweep before resolving an identifier
    pub sweep_on_resolve: bool,
    /// How many identifiers to try before giving up on creation
    pub id_generation_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            url: String::new(),
            session_name: "SESSID".to_string(),
            header_name: None,
            namespace: "session".to_string(),
            expiration: Expiration::default(),
            cookie: CookieAttributes::default(),
            store_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            sweep_on_resolve: true,
            id_generation_attempts: 5,
        }
    }
}

impl SessionConfig {
    /// Create an in-memory session configuration.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a Redis session configuration.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Examples
    ///
    /// ```
    /// use servlet_session::SessionConfig;
    ///
    /// let config = SessionConfig::redis("redis://localhost:6379").unwrap();
    /// ```
    pub fn redis(url: &str) -> SessionResult<Self> {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(SessionError::InvalidUrl(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(Self {
            backend: SessionBackend::Redis,
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Load overrides from `SERVLET_SESSION_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> SessionResult<Self> {
        let mut config = match env::var("SERVLET_SESSION_REDIS_URL") {
            Ok(url) => Self::redis(&url)?,
            Err(_) => Self::memory(),
        };

        if let Ok(name) = env::var("SERVLET_SESSION_NAME") {
            config.session_name = name;
        }

        if let Some(seconds) = env_parse::<i64>("SERVLET_SESSION_MAX_AGE") {
            config.expiration = Expiration::maximum_age(seconds);
        }

        if let Some(ms) = env_parse::<u64>("SERVLET_SESSION_STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = env_parse::<u64>("SERVLET_SESSION_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the cookie name carrying the identifier.
    pub fn with_session_name(mut self, name: &str) -> Self {
        self.session_name = name.to_string();
        self
    }

    /// Also accept the identifier from this request header.
    pub fn with_header_name(mut self, header: &str) -> Self {
        self.header_name = Some(header.to_string());
        self
    }

    /// Set the session namespace/prefix.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Expire new sessions a fixed number of seconds after creation.
    pub fn with_maximum_age(mut self, seconds: i64) -> Self {
        self.expiration = Expiration::maximum_age(seconds);
        self
    }

    /// Set the expiration policy for new sessions.
    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Set the default cookie scope.
    pub fn with_cookie(mut self, cookie: CookieAttributes) -> Self {
        self.cookie = cookie;
        self
    }

    /// Bound every store operation by `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the background sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable the opportunistic sweep before `resolve()`.
    pub fn with_sweep_on_resolve(mut self, enabled: bool) -> Self {
        self.sweep_on_resolve = enabled;
        self
    }

    /// Set how many identifiers are generated before creation fails.
    pub fn with_id_generation_attempts(mut self, attempts: u32) -> Self {
        self.id_generation_attempts = attempts;
        self
    }

    /// Reject configurations the manager cannot operate with.
    pub fn validate(&self) -> SessionResult<()> {
        if self.session_name.is_empty() {
            return Err(SessionError::Config("session name must not be empty".to_string()));
        }
        if self.id_generation_attempts == 0 {
            return Err(SessionError::Config(
                "at least one identifier generation attempt is required".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(SessionError::Config("store timeout must be positive".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(SessionError::Config("sweep interval must be positive".to_string()));
        }
        self.expiration.validate()
    }

    /// Build the session key with namespace.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.namespace, session_id)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.backend, SessionBackend::Memory);
        assert_eq!(config.session_name, "SESSID");
        assert_eq!(config.cookie.path, "/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url_validation() {
        assert!(SessionConfig::redis("redis://localhost:6379").is_ok());
        assert!(SessionConfig::redis("rediss://cache:6380").is_ok());
        assert!(matches!(
            SessionConfig::redis("http://localhost"),
            Err(SessionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_builder_chain() {
        let config = SessionConfig::memory()
            .with_session_name("APPSESSID")
            .with_maximum_age(60)
            .with_store_timeout(Duration::from_millis(250))
            .with_id_generation_attempts(3);

        assert_eq!(config.session_name, "APPSESSID");
        assert_eq!(config.expiration, Expiration::maximum_age(60));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.id_generation_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        assert!(SessionConfig::memory().with_session_name("").validate().is_err());
        assert!(SessionConfig::memory().with_id_generation_attempts(0).validate().is_err());
        assert!(SessionConfig::memory().with_maximum_age(0).validate().is_err());
        assert!(SessionConfig::memory().with_store_timeout(Duration::ZERO).validate().is_err());
        assert!(SessionConfig::memory().with_maximum_age(i64::MAX / 1000).validate().is_err());
    }

    #[test]
    fn test_session_key() {
        let config = SessionConfig::memory().with_namespace("shop");
        assert_eq!(config.session_key("abc"), "shop:abc");
    }
}
