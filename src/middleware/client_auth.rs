//! Client-credential extraction and authentication shared by the token,
//! introspection, and revocation endpoints (§4.6/§4.7 step 1-3, §10.5).
//!
//! Grounded on `middleware/auth_middleware.rs`'s header-extraction +
//! `FromRequestParts` pattern, generalized from Bearer-JWT-only to the
//! `client_id`/`client_secret` credential pair RFC 7662/RFC 7617 require,
//! sourced from either the form body or an `Authorization: Basic` header.

use crate::models::client::{ClientLookup, OAuthClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAuthFailed;

/// §4.6 step 2 / RFC 7617: `Authorization: Basic base64(user:pass)`, with
/// each of `user`/`pass` additionally percent-decoded.
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((percent_decode(user), percent_decode(pass)))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolve `client_id`/`client_secret` either from already-parsed form
/// fields or from an `Authorization: Basic` header, preferring the former
/// (RFC 7662/7009 allow either; the spec doesn't require one over the
/// other when both are present).
pub fn resolve_credentials(
    body_client_id: Option<&str>,
    body_client_secret: Option<&str>,
    authorization_header: Option<&str>,
) -> Option<(String, String)> {
    if let (Some(id), Some(secret)) = (body_client_id, body_client_secret) {
        return Some((id.to_string(), secret.to_string()));
    }
    authorization_header.and_then(parse_basic_auth)
}

/// Look up the client and check its secret in constant time (§5). The one
/// shared authentication step behind the token endpoint, introspection,
/// and revocation.
pub async fn authenticate_client(
    clients: &dyn ClientLookup,
    client_id: &str,
    client_secret: &str,
) -> Result<OAuthClient, ClientAuthFailed> {
    let client = clients.find(client_id).await.ok_or(ClientAuthFailed)?;
    if client.secret_matches(client_secret) {
        Ok(client)
    } else {
        Err(ClientAuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_auth_header() {
        let header = format!(
            "Basic {}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"cli1:se%20cret")
        );
        let (id, secret) = parse_basic_auth(&header).unwrap();
        assert_eq!(id, "cli1");
        assert_eq!(secret, "se cret");
    }

    #[test]
    fn body_credentials_take_priority_over_header() {
        let header = format!(
            "Basic {}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"header-id:header-secret")
        );
        let resolved = resolve_credentials(Some("body-id"), Some("body-secret"), Some(&header));
        assert_eq!(resolved, Some(("body-id".to_string(), "body-secret".to_string())));
    }

    #[test]
    fn falls_back_to_header_when_body_missing() {
        let header = format!(
            "Basic {}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"cli1:sekret")
        );
        let resolved = resolve_credentials(None, None, Some(&header));
        assert_eq!(resolved, Some(("cli1".to_string(), "sekret".to_string())));
    }
}
