//! The slice of the HTTP layer the session engine consumes.
//!
//! Header parsing and cookie serialization stay with the HTTP layer; the
//! manager only needs to read the incoming identifier and hand back a
//! [`SessionCookie`].

use crate::cookie::SessionCookie;

/// Read access to an incoming request.
pub trait SessionRequest {
    /// Value of the header `key`, if present.
    fn header(&self, key: &str) -> Option<String>;

    /// Whether the request carries a cookie named `name`.
    fn has_cookie(&self, name: &str) -> bool;

    /// Value of the cookie named `name`, if present.
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Write access to the outgoing response.
pub trait SessionResponse {
    /// Attach a cookie to the response.
    fn add_cookie(&mut self, cookie: SessionCookie);

    /// Whether the response already carries a cookie named `name`.
    fn has_cookie(&self, name: &str) -> bool;
}
