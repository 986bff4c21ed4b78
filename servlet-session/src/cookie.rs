//! Cookie scope and expiration policy carried by every session.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted maximum age. User agents cap cookie lifetimes at 400 days.
pub const MAX_MAXIMUM_AGE_SECS: i64 = 400 * 24 * 60 * 60;

/// Expiration policy of a session.
///
/// Exactly one policy governs a session: either an absolute instant or a
/// maximum age counted from the moment the session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Expiration {
    /// Session expires at a fixed instant
    Lifetime {
        /// Absolute expiry instant
        expires_at: DateTime<Utc>,
    },
    /// Session expires `seconds` after creation
    MaximumAge {
        /// Time-to-live in seconds
        seconds: i64,
    },
}

impl Expiration {
    /// Absolute expiry policy.
    pub fn lifetime(expires_at: DateTime<Utc>) -> Self {
        Expiration::Lifetime { expires_at }
    }

    /// Relative expiry policy.
    pub fn maximum_age(seconds: i64) -> Self {
        Expiration::MaximumAge { seconds }
    }

    /// Expiry instant for a session created at `created_at`.
    ///
    /// Saturates at the representable range instead of overflowing.
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Expiration::Lifetime { expires_at } => *expires_at,
            Expiration::MaximumAge { seconds } => TimeDelta::try_seconds(*seconds)
                .and_then(|ttl| created_at.checked_add_signed(ttl))
                .unwrap_or(if *seconds < 0 {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    DateTime::<Utc>::MAX_UTC
                }),
        }
    }

    /// Reject a maximum age that is not positive or exceeds [`MAX_MAXIMUM_AGE_SECS`].
    pub fn validate(&self) -> SessionResult<()> {
        if let Expiration::MaximumAge { seconds } = *self {
            if seconds <= 0 {
                return Err(SessionError::Config("maximum age must be positive".to_string()));
            }
            if seconds > MAX_MAXIMUM_AGE_SECS {
                return Err(SessionError::Config(format!(
                    "maximum age must not exceed {MAX_MAXIMUM_AGE_SECS} seconds"
                )));
            }
        }
        Ok(())
    }

    /// The relative TTL, if this is a maximum-age policy.
    pub fn max_age_seconds(&self) -> Option<i64> {
        match self {
            Expiration::Lifetime { .. } => None,
            Expiration::MaximumAge { seconds } => Some(*seconds),
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::MaximumAge { seconds: 1440 }
    }
}

/// Cookie scoping attributes, fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieAttributes {
    /// Host the user agent sends the cookie to
    pub domain: Option<String>,
    /// Path scope of the cookie
    pub path: String,
    /// Only send over secure channels
    pub secure: bool,
    /// Hide the cookie from client-side scripts
    pub http_only: bool,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            domain: None,
            path: "/".to_string(),
            secure: false,
            http_only: true,
        }
    }
}

impl CookieAttributes {
    /// Set the cookie domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the cookie path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the secure flag.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the HttpOnly flag.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }
}

/// Cookie handed to the response to carry a session identifier.
///
/// Rendering the `Set-Cookie` header is left to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Absolute expiry, set for lifetime-governed sessions
    pub expires: Option<DateTime<Utc>>,
    /// Remaining seconds, set for maximum-age sessions and removals
    pub max_age: Option<i64>,
}

impl SessionCookie {
    /// Cookie propagating a live session identifier.
    pub fn for_session(
        name: &str,
        id: &str,
        attributes: &CookieAttributes,
        expiration: &Expiration,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let (expires, max_age) = match expiration {
            Expiration::Lifetime { expires_at } => (Some(*expires_at), None),
            Expiration::MaximumAge { .. } => {
                let remaining = (expiration.expires_at(created_at) - now).num_seconds().max(0);
                (None, Some(remaining))
            }
        };

        Self {
            name: name.to_string(),
            value: id.to_string(),
            domain: attributes.domain.clone(),
            path: attributes.path.clone(),
            secure: attributes.secure,
            http_only: attributes.http_only,
            expires,
            max_age,
        }
    }

    /// Cookie telling the client to forget a destroyed session.
    pub fn removal(name: &str, attributes: &CookieAttributes) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            domain: attributes.domain.clone(),
            path: attributes.path.clone(),
            secure: attributes.secure,
            http_only: attributes.http_only,
            expires: None,
            max_age: Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    #[test]
    fn test_maximum_age_counts_from_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let policy = Expiration::maximum_age(60);
        assert_eq!(policy.expires_at(created), created + ChronoDuration::seconds(60));
        assert_eq!(policy.max_age_seconds(), Some(60));
    }

    #[test]
    fn test_huge_maximum_age_saturates() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let policy = Expiration::maximum_age(i64::MAX / 1000);

        assert_eq!(policy.expires_at(created), DateTime::<Utc>::MAX_UTC);
        assert_eq!(Expiration::maximum_age(i64::MIN).expires_at(created), DateTime::<Utc>::MIN_UTC);

        let cookie = SessionCookie::for_session(
            "SESSID",
            "abc",
            &CookieAttributes::default(),
            &policy,
            created,
            created,
        );
        assert!(cookie.max_age.unwrap() > 0);
    }

    #[test]
    fn test_expiration_validation() {
        assert!(Expiration::maximum_age(60).validate().is_ok());
        assert!(Expiration::maximum_age(MAX_MAXIMUM_AGE_SECS).validate().is_ok());
        assert!(Expiration::maximum_age(0).validate().is_err());
        assert!(Expiration::maximum_age(MAX_MAXIMUM_AGE_SECS + 1).validate().is_err());
        assert!(matches!(
            Expiration::maximum_age(i64::MAX / 1000).validate(),
            Err(SessionError::Config(_))
        ));
        assert!(Expiration::lifetime(Utc::now()).validate().is_ok());
    }

    #[test]
    fn test_lifetime_ignores_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let deadline = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let policy = Expiration::lifetime(deadline);
        assert_eq!(policy.expires_at(created), deadline);
        assert_eq!(policy.max_age_seconds(), None);
    }

    #[test]
    fn test_cookie_for_maximum_age_session() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = created + ChronoDuration::seconds(20);
        let attrs = CookieAttributes::default().with_domain("example.com").with_secure(true);

        let cookie =
            SessionCookie::for_session("SESSID", "abc", &attrs, &Expiration::maximum_age(60), created, now);

        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
        assert_eq!(cookie.max_age, Some(40));
        assert_eq!(cookie.expires, None);
    }

    #[test]
    fn test_removal_cookie() {
        let cookie = SessionCookie::removal("SESSID", &CookieAttributes::default());
        assert!(cookie.value.is_empty());
        assert_eq!(cookie.max_age, Some(0));
    }
}
