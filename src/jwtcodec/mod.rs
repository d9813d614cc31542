//! JWT codec (§4 "JWT codec" row, §6 wire format). Parses headers/claims,
//! verifies RS256/ES256 signatures against a resolved key, and constructs
//! signed access/refresh tokens. Key *material* and JWKS resolution are
//! out of scope here (§1 Non-goals) -- this module only consumes keys
//! handed to it by `crate::jwks`.
//!
//! Grounded on `services/jwt.rs`'s `JwtConfig`/claims-struct split, widened
//! from the teacher's HS256-only scheme to the asymmetric algorithms §6
//! requires.

use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtCodecError {
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("alg:none is not permitted for this tenant")]
    NoneAlgRejected,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
}

impl From<jsonwebtoken::errors::Error> for JwtCodecError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtCodecError::Expired,
            ErrorKind::ImmatureSignature => JwtCodecError::NotYetValid,
            ErrorKind::InvalidSignature => JwtCodecError::BadSignature,
            _ => JwtCodecError::Malformed(err.to_string()),
        }
    }
}

/// Claims carried by an access token (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub aud: serde_json::Value,
    pub iss: String,
    pub jti: String,
    pub scope: String,
    pub client_id: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Claims carried by a refresh token (§4.4: "a JWT containing the claims
/// `sub=user_id`, `aud=client_id`, `jti`, `rtv=version`, `exp`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub rtv: u64,
    pub scope: String,
    pub iat: u64,
    pub exp: u64,
}

/// The header fields this module cares about, decoded without verifying
/// the signature (introspection step 4: "Parse the token ... without
/// signature check").
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub alg: Algorithm,
    pub kid: Option<String>,
}

/// Parse the JWT header only. Used by introspection to pick a JWKS entry
/// before any key is available to verify against.
pub fn parse_header(token: &str) -> Result<ParsedHeader, JwtCodecError> {
    let header = decode_header(token)?;
    Ok(ParsedHeader {
        alg: header.alg,
        kid: header.kid,
    })
}

/// Decode the payload without checking the signature (introspection §4.6
/// step 4: "Parse the token ... without signature check. On parse failure
/// return `{ active: false }`"). The caller must not trust anything in the
/// result until it's re-verified against a resolved key.
pub fn decode_unverified_claims(token: &str) -> Result<serde_json::Value, JwtCodecError> {
    let header = decode_header(token)?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = decode::<serde_json::Value>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Verify a token's signature and return its claims as a generic JSON
/// value (used by introspection, which must inspect fields generically
/// before knowing whether it's an access or refresh token).
pub fn verify_claims_value(
    token: &str,
    key: &VerifyingKey,
    expected_issuer: &str,
    allow_none_alg: bool,
) -> Result<serde_json::Value, JwtCodecError> {
    ensure_asymmetric(key.alg, allow_none_alg)?;
    let mut validation = Validation::new(key.alg);
    validation.validate_aud = false;
    validation.set_issuer(&[expected_issuer]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;
    let data = decode::<serde_json::Value>(token, &key.key, &validation)?;
    Ok(data.claims)
}

/// A resolved verification key, tagged with the algorithm it was issued
/// for. Produced by `crate::jwks` and handed in here -- this module never
/// fetches or caches keys itself.
pub struct VerifyingKey {
    pub alg: Algorithm,
    pub key: DecodingKey,
}

/// A resolved signing key, for constructing new tokens.
pub struct SigningKey {
    pub alg: Algorithm,
    pub kid: String,
    pub key: EncodingKey,
}

fn ensure_asymmetric(alg: Algorithm, allow_none_alg: bool) -> Result<(), JwtCodecError> {
    match alg {
        Algorithm::RS256 | Algorithm::ES256 => Ok(()),
        Algorithm::HS256 if allow_none_alg => Ok(()),
        other => {
            if format!("{:?}", other).eq_ignore_ascii_case("none") {
                if allow_none_alg {
                    Ok(())
                } else {
                    Err(JwtCodecError::NoneAlgRejected)
                }
            } else {
                Err(JwtCodecError::UnsupportedAlg(format!("{:?}", other)))
            }
        }
    }
}

/// Verify and decode an access token's claims against a resolved key.
/// `expected_issuer`/`expected_audience` come from tenant configuration;
/// audience may be a string or array in the token per §4.6 step 6.
pub fn verify_access_token(
    token: &str,
    key: &VerifyingKey,
    expected_issuer: &str,
    allow_none_alg: bool,
) -> Result<AccessTokenClaims, JwtCodecError> {
    ensure_asymmetric(key.alg, allow_none_alg)?;
    let mut validation = Validation::new(key.alg);
    validation.validate_aud = false; // aud may be string or array; checked by caller
    validation.set_issuer(&[expected_issuer]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    let data = decode::<AccessTokenClaims>(token, &key.key, &validation)?;
    Ok(data.claims)
}

/// Verify and decode a refresh token's claims. Per §4.6 step 9, the
/// introspection path additionally consults the Refresh Rotator's
/// `validate`; this function only checks the JWT envelope.
pub fn verify_refresh_token(
    token: &str,
    key: &VerifyingKey,
    allow_none_alg: bool,
) -> Result<RefreshTokenClaims, JwtCodecError> {
    ensure_asymmetric(key.alg, allow_none_alg)?;
    let mut validation = Validation::new(key.alg);
    validation.validate_aud = false;
    validation.validate_exp = true;
    validation.validate_nbf = false;
    validation.leeway = 0;

    let data = decode::<RefreshTokenClaims>(token, &key.key, &validation)?;
    Ok(data.claims)
}

pub fn sign_access_token(claims: &AccessTokenClaims, key: &SigningKey) -> Result<String, JwtCodecError> {
    let mut header = Header::new(key.alg);
    header.kid = Some(key.kid.clone());
    encode(&header, claims, &key.key).map_err(Into::into)
}

pub fn sign_refresh_token(claims: &RefreshTokenClaims, key: &SigningKey) -> Result<String, JwtCodecError> {
    let mut header = Header::new(key.alg);
    header.kid = Some(key.kid.clone());
    encode(&header, claims, &key.key).map_err(Into::into)
}

/// `aud` accepts string or array (§4.6 step 6) -- check membership either way.
pub fn audience_contains(aud: &serde_json::Value, expected: &str) -> bool {
    match aud {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(items) => items.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    // RSA test keypair, 2048-bit, PKCS#1 PEM -- generated once for fixture use only.
    const TEST_RSA_PRIVATE: &str = include_str!("../../tests/fixtures/test_rsa_private.pem");
    const TEST_RSA_PUBLIC: &str = include_str!("../../tests/fixtures/test_rsa_public.pem");

    fn signing_key() -> SigningKey {
        SigningKey {
            alg: Algorithm::RS256,
            kid: "test-kid".into(),
            key: EncodingKey::from_rsa_pem(TEST_RSA_PRIVATE.as_bytes()).unwrap(),
        }
    }

    fn verifying_key() -> VerifyingKey {
        VerifyingKey {
            alg: Algorithm::RS256,
            key: DecodingKey::from_rsa_pem(TEST_RSA_PUBLIC.as_bytes()).unwrap(),
        }
    }

    // Anchored at 2100-01-01 rather than "now" so validity doesn't erode as
    // the calendar moves on -- `jsonwebtoken`'s exp/nbf checks use the real
    // system clock, not a value this test controls.
    const FAR_FUTURE: u64 = 4_102_444_800;

    fn sample_claims(now: u64) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: "user-1".into(),
            aud: serde_json::json!("client-1"),
            iss: "https://issuer.example".into(),
            jti: "jti-1".into(),
            scope: "openid profile".into(),
            client_id: "client-1".into(),
            iat: now,
            exp: now + 3600,
            nbf: None,
            act: None,
            resource: None,
        }
    }

    #[test]
    fn round_trips_access_token() {
        let now = FAR_FUTURE;
        let claims = sample_claims(now);
        let token = sign_access_token(&claims, &signing_key()).unwrap();
        let decoded =
            verify_access_token(&token, &verifying_key(), "https://issuer.example", false).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.jti, "jti-1");
    }

    #[test]
    fn rejects_wrong_issuer() {
        let now = FAR_FUTURE;
        let claims = sample_claims(now);
        let token = sign_access_token(&claims, &signing_key()).unwrap();
        let result = verify_access_token(&token, &verifying_key(), "https://someone-else", false);
        assert!(result.is_err());
    }

    #[test]
    fn audience_matches_string_and_array() {
        assert!(audience_contains(&serde_json::json!("a"), "a"));
        assert!(audience_contains(&serde_json::json!(["a", "b"]), "b"));
        assert!(!audience_contains(&serde_json::json!(["a", "b"]), "c"));
    }

    #[test]
    fn parse_header_reads_alg_and_kid() {
        let now = FAR_FUTURE;
        let claims = sample_claims(now);
        let token = sign_access_token(&claims, &signing_key()).unwrap();
        let header = parse_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("test-kid"));
    }
}
