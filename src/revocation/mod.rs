//! Revocation Engine (RFC 7009, §4.7). Same client-auth and parsing path as
//! `crate::introspection`; dispatches to the Refresh Rotator or the
//! Revocation Store depending on the token-type hint, and always answers
//! with HTTP 200 once the client is authenticated (testable property 10).
//!
//! No teacher equivalent -- the dispatch logic is new, grounded in
//! `services/jwt.rs::logout_token`'s revoke-store call shape for what it
//! means to "revoke" a token, restructured to choose between the two
//! spec collaborators (Rotator vs Revocation Store) instead of a single
//! Redis blacklist.

use std::sync::Arc;

use crate::introspection::{parse_basic_auth, ClientAuthFailed};
use crate::jwks::JwksCache;
use crate::jwtcodec::{self, VerifyingKey};
use crate::models::client::ClientLookup;
use crate::refresh::RefreshRotator;
use crate::revocation_store::RevocationStore;

#[derive(Debug, Clone)]
pub struct RevocationRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: String,
    pub client_secret: String,
}

/// Same body/header shape as `introspection::parse_form_request` (§4.7
/// step 1: "same content-type and client-authentication path as §4.6").
pub fn parse_form_request(
    content_type: Option<&str>,
    body: &str,
    authorization_header: Option<&str>,
) -> Result<RevocationRequest, &'static str> {
    if !content_type
        .map(|c| c.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
    {
        return Err("invalid_request");
    }

    let fields: std::collections::HashMap<String, String> =
        url::form_urlencoded::parse(body.as_bytes()).into_owned().collect();

    let token = fields.get("token").cloned().ok_or("invalid_request")?;
    let token_type_hint = fields.get("token_type_hint").cloned();

    let (client_id, client_secret) = if let (Some(id), Some(secret)) =
        (fields.get("client_id"), fields.get("client_secret"))
    {
        (id.clone(), secret.clone())
    } else if let Some(basic) = authorization_header.and_then(parse_basic_auth) {
        basic
    } else {
        return Err("invalid_request");
    };

    Ok(RevocationRequest { token, token_type_hint, client_id, client_secret })
}

pub struct RevocationEngine {
    pub jwks: Arc<JwksCache>,
    pub clients: Arc<dyn ClientLookup>,
    pub revocation_store: Arc<RevocationStore>,
    pub refresh_rotator: Arc<RefreshRotator>,
    pub issuer: String,
    pub allow_none_alg: bool,
    pub access_token_expiry_s: i64,
}

impl RevocationEngine {
    /// Client-auth failure is the only outcome this returns as an error;
    /// every other path (bad token, ownership mismatch, already-revoked)
    /// silently succeeds (§4.7 steps 2-6).
    pub async fn revoke(&self, req: RevocationRequest) -> Result<(), ClientAuthFailed> {
        let client = self.clients.find(&req.client_id).await.ok_or(ClientAuthFailed)?;
        if !client.secret_matches(&req.client_secret) {
            return Err(ClientAuthFailed);
        }

        self.revoke_authenticated(&req).await;
        Ok(())
    }

    async fn revoke_authenticated(&self, req: &RevocationRequest) {
        let Ok(header) = jwtcodec::parse_header(&req.token) else { return };

        let Ok(Some(resolved)) = self.jwks.resolve(header.kid.as_deref().unwrap_or_default()).await
        else {
            return;
        };

        let key = VerifyingKey { alg: resolved.alg, key: (*resolved.decoding_key).clone() };
        let Ok(claims) =
            jwtcodec::verify_claims_value(&req.token, &key, &self.issuer, self.allow_none_alg)
        else {
            return;
        };

        let Some(jti) = claims.get("jti").and_then(|v| v.as_str()) else { return };

        let token_client_id = claims.get("client_id").and_then(|v| v.as_str());
        let aud_client_id = claims.get("aud").and_then(|v| v.as_str());
        let owning_client_id = token_client_id.or(aud_client_id);
        if owning_client_id != Some(req.client_id.as_str()) {
            return;
        }

        match req.token_type_hint.as_deref() {
            Some("refresh_token") => {
                self.refresh_rotator.revoke_by_jti(jti, Some("revocation_endpoint")).await;
            }
            Some("access_token") => {
                let now = crate::util::now_ms() / 1000;
                self.revocation_store.revoke(jti, now + self.access_token_expiry_s).await;
            }
            _ => {
                let revoked_as_refresh =
                    self.refresh_rotator.revoke_by_jti(jti, Some("revocation_endpoint")).await;
                if !revoked_as_refresh {
                    let now = crate::util::now_ms() / 1000;
                    self.revocation_store.revoke(jti, now + self.access_token_expiry_s).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::jwks::StaticKeyManager;
    use crate::jwtcodec::{AccessTokenClaims, SigningKey};
    use crate::kv::{InMemoryKv, KvStore};
    use crate::models::client::{hash_client_secret, OAuthClient};
    use async_trait::async_trait;
    use jsonwebtoken::{Algorithm, EncodingKey};
    use std::time::Duration;

    const TEST_RSA_PRIVATE: &str = include_str!("../../tests/fixtures/test_rsa_private.pem");

    // Same modulus as the `test_rsa_public.pem` fixture, base64url-encoded --
    // reused across the jwks/jwtcodec test suites so a token signed with
    // `TEST_RSA_PRIVATE` verifies against this JWK.
    const TEST_RSA_N: &str = "uiTWHO4ARRCqVj9cWabEMkA7Ji2ygAz1Yr1TS-mTv75jZMcvutOvxrKCCKhBr5Ogsxi-eQ9NXT3BQ21jOs9G-VHbj3YRQC3CnoRnF91pVP5De5CbEeqsGkFdEoAdDzZ-dJ__bf5LlfMjJkPphP69jeMOYqsdh-bufmrE6ylJnrzAiFetFR4DbEoaSBOZQoqxfRrMQO3VonyE5QPXtaVBMcJTwpn81-DgJ-I48c_hf-5nagc8pwLUuRxEG3AGuYaIJJIvgsveP0akIpEQIwdvnPFIbdLgRO3WsfIzlF69DYNzfdNU5vNR0mJAuRywksuXJTeThzzWcn8BoeNGBwXWsw";

    struct StubClients(OAuthClient);

    #[async_trait]
    impl ClientLookup for StubClients {
        async fn find(&self, client_id: &str) -> Option<OAuthClient> {
            (self.0.client_id == client_id).then(|| self.0.clone())
        }
    }

    fn jwk_entry() -> crate::jwks::JwkEntry {
        crate::jwks::JwkEntry {
            kid: "test-kid".into(),
            kty: "RSA".into(),
            use_: "sig".into(),
            alg: "RS256".into(),
            n: Some(TEST_RSA_N.into()),
            e: Some("AQAB".into()),
            x: None,
            y: None,
            crv: None,
        }
    }

    fn engine_with(client: OAuthClient) -> RevocationEngine {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let manager: Arc<dyn crate::jwks::KeyManager> =
            Arc::new(StaticKeyManager { entry: jwk_entry() });
        let jwks = Arc::new(JwksCache::new(
            kv.clone(),
            manager,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        let audit = Arc::new(InMemoryAuditSink::new());
        RevocationEngine {
            jwks,
            clients: Arc::new(StubClients(client)),
            revocation_store: Arc::new(RevocationStore::new(kv.clone())),
            refresh_rotator: Arc::new(RefreshRotator::new(kv, audit)),
            issuer: "https://issuer.example".into(),
            allow_none_alg: false,
            access_token_expiry_s: 3600,
        }
    }

    fn stub_client() -> OAuthClient {
        let tenant_id = uuid::Uuid::nil();
        OAuthClient {
            client_id: "cli1".into(),
            client_secret_hash: hash_client_secret("sekret", &tenant_id.to_string()),
            tenant_id,
            redirect_uris: serde_json::json!([]),
            allowed_scopes: serde_json::json!([]),
            is_confidential: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn client_auth_failure_is_rejected() {
        let engine = engine_with(stub_client());
        let result = engine
            .revoke(RevocationRequest {
                token: "whatever".into(),
                token_type_hint: None,
                client_id: "cli1".into(),
                client_secret: "wrong".into(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn malformed_token_after_auth_success_is_silent() {
        let engine = engine_with(stub_client());
        let result = engine
            .revoke(RevocationRequest {
                token: "not-a-jwt".into(),
                token_type_hint: None,
                client_id: "cli1".into(),
                client_secret: "sekret".into(),
            })
            .await;
        assert!(result.is_ok());
    }

    // 2100-01-01, matching the anchor used in jwtcodec's own tests so a
    // signed-now token stays valid regardless of when this suite runs.
    const FAR_FUTURE: u64 = 4_102_444_800;

    fn signed_access_token(client_id: &str, jti: &str) -> String {
        let signing_key = SigningKey {
            alg: Algorithm::RS256,
            kid: "test-kid".into(),
            key: EncodingKey::from_rsa_pem(TEST_RSA_PRIVATE.as_bytes()).unwrap(),
        };
        let claims = AccessTokenClaims {
            sub: "user-1".into(),
            aud: serde_json::json!("cli1"),
            iss: "https://issuer.example".into(),
            jti: jti.into(),
            scope: "openid".into(),
            client_id: client_id.into(),
            iat: FAR_FUTURE,
            exp: FAR_FUTURE + 3600,
            nbf: None,
            act: None,
            resource: None,
        };
        jwtcodec::sign_access_token(&claims, &signing_key).unwrap()
    }

    #[tokio::test]
    async fn revoking_access_token_for_wrong_owning_client_is_silent() {
        let engine = engine_with(stub_client());
        let token = signed_access_token("someone-else", "jti-xyz");

        let result = engine
            .revoke(RevocationRequest {
                token,
                token_type_hint: Some("access_token".into()),
                client_id: "cli1".into(),
                client_secret: "sekret".into(),
            })
            .await;
        assert!(result.is_ok());
        assert!(!engine.revocation_store.is_revoked("jti-xyz").await);
    }

    #[tokio::test]
    async fn revoking_owned_access_token_marks_it_revoked() {
        let engine = engine_with(stub_client());
        let token = signed_access_token("cli1", "jti-owned");

        let result = engine
            .revoke(RevocationRequest {
                token,
                token_type_hint: Some("access_token".into()),
                client_id: "cli1".into(),
                client_secret: "sekret".into(),
            })
            .await;
        assert!(result.is_ok());
        assert!(engine.revocation_store.is_revoked("jti-owned").await);
    }

    #[test]
    fn parses_form_body_with_client_credentials() {
        let body = "token=abc&token_type_hint=access_token&client_id=cli1&client_secret=sekret";
        let req = parse_form_request(Some("application/x-www-form-urlencoded"), body, None).unwrap();
        assert_eq!(req.token, "abc");
        assert_eq!(req.client_id, "cli1");
    }
}
