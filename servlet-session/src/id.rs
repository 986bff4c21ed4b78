//! Session identifier generation and validation.

use rand::RngCore;

/// Random bytes per identifier (160 bits).
const ID_BYTES: usize = 20;

/// Longest identifier accepted from a client.
const MAX_ID_LEN: usize = 128;

/// Generate a new session ID from the thread-local CSPRNG.
///
/// Identifiers travel to untrusted clients, so they come from a random
/// space rather than a counter.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `id` could name a session.
///
/// Accepts non-empty ASCII alphanumerics plus `-` and `_`, which covers
/// generated identifiers and UUIDs while rejecting anything that could
/// escape a store key namespace.
pub fn is_well_formed_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_well_formed() {
        let id = generate_session_id();
        assert_eq!(id.len(), ID_BYTES * 2);
        assert!(is_well_formed_session_id(&id));
    }

    #[test]
    fn test_generated_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_malformed_ids() {
        assert!(!is_well_formed_session_id(""));
        assert!(!is_well_formed_session_id("abc:def"));
        assert!(!is_well_formed_session_id("abc def"));
        assert!(!is_well_formed_session_id("../etc/passwd"));
        assert!(!is_well_formed_session_id(&"a".repeat(MAX_ID_LEN + 1)));
        assert!(is_well_formed_session_id("550e8400-e29b-41d4-a716-446655440000"));
    }
}
