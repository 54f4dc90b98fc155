//! Identifier helpers
//!
//! Session identifiers, per-request correlation ids and device fingerprints.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::logging::targets;
use uuid::Uuid;

/// Session identifier length in bytes (before base64 encoding)
const SESSION_ID_BYTES: usize = 32;

/// Generate a new session identifier (base64url, no padding).
///
/// Falls back to a v4 UUID if the OS random source is unavailable; session
/// creation must never fail a request.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    match getrandom::fill(&mut bytes) {
        Ok(()) => URL_SAFE_NO_PAD.encode(bytes),
        Err(e) => {
            warn!(target: targets::SESSION, error = %e, "random source unavailable, using uuid session id");
            Uuid::new_v4().simple().to_string()
        }
    }
}

/// Generate a per-request correlation id.
pub fn generate_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// Whether a string can be a session identifier produced by this crate.
///
/// Used by storage backends that derive file names from identifiers.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Derive a stable device fingerprint from the user agent and client address.
pub fn fingerprint(user_agent: &str, ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update([0u8]);
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id();
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(id.len(), 43);
        assert!(is_valid_session_id(&id));
    }

    #[test]
    fn test_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_is_valid_session_id() {
        assert!(is_valid_session_id("abc-DEF_123"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc/passwd"));
        assert!(!is_valid_session_id("a b"));
        assert!(!is_valid_session_id(&"a".repeat(129)));
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint("Mozilla/5.0", "10.0.0.1");
        let b = fingerprint("Mozilla/5.0", "10.0.0.1");
        let c = fingerprint("Mozilla/5.0", "10.0.0.2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }
}
