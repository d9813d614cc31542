//! Clock & ID source: monotonic-enough time, UUIDv4, base64url -- the leaf
//! component spec §2 calls out separately from the actors that consume it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Current time in epoch milliseconds, used throughout the actors for
/// `expires_at` comparisons. Not required to be monotonic across a clock
/// step -- the spec's actors only compare against stored absolute timestamps.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_uuid() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}

/// A 128-bit opaque, unguessable, base64url-encoded token -- used for
/// authorization codes (§6: "Codes are 128-bit opaque strings, base64url")
/// and session ids.
pub fn new_opaque_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64url_encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_tokens_are_unique_and_well_formed() {
        let a = new_opaque_token();
        let b = new_opaque_token();
        assert_ne!(a, b);
        assert!(base64url_decode(&a).is_ok());
        assert_eq!(base64url_decode(&a).unwrap().len(), 16);
    }
}
