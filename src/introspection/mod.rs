//! Introspection Engine (RFC 7662, §4.6). A pure function over a parsed
//! request plus collaborators: JWKS cache, client registry, revocation
//! store, refresh rotator. Every non-active outcome collapses to
//! `{active:false}` with HTTP 200 -- by design, to deny scanning (§4.6,
//! §7, testable property 9).
//!
//! Grounded on `turbomcp-auth/src/introspection.rs`'s `IntrospectionResponse`
//! shape (RFC 7662 fields, `aud: Option<Value>` to accept string-or-array).
//! That file is a *client* calling someone else's introspection endpoint;
//! this module is the server-side engine that answers such a call, so the
//! logic itself is written fresh against the JWKS cache, Revocation Store,
//! and Refresh Rotator collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::jwks::JwksCache;
use crate::jwtcodec::{self, audience_contains, VerifyingKey};
use crate::middleware::client_auth::{self, ClientAuthFailed as MiddlewareAuthFailed};
use crate::models::client::ClientLookup;
use crate::refresh::RefreshRotator;
use crate::revocation_store::RevocationStore;

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct InactiveResponse {
    pub active: bool, // always false
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveResponse {
    pub active: bool, // always true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

pub enum IntrospectionOutcome {
    Active(ActiveResponse),
    Inactive,
}

/// 401 is the one non-oracle-free outcome (§4.6 step 3, §7: "client-auth
/// errors are surfaced immediately and distinctly because clients need
/// them").
pub type ClientAuthFailed = MiddlewareAuthFailed;

/// Pre-parsed request fields. The HTTP layer is responsible for the
/// content-type check (§4.6 step 1) and extracting these from either the
/// form body or an `Authorization: Basic` header (step 2) before calling
/// into this engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: String,
    pub client_secret: String,
}

pub struct IntrospectionEngine {
    pub jwks: Arc<JwksCache>,
    pub clients: Arc<dyn ClientLookup>,
    pub revocation_store: Arc<RevocationStore>,
    pub refresh_rotator: Arc<RefreshRotator>,
    pub issuer: String,
    pub strict_introspection: bool,
    pub expected_audience: String,
    pub allow_none_alg: bool,
}

impl IntrospectionEngine {
    /// Steps 3-10 of §4.6. Step 3 (client auth) is the only branch that
    /// surfaces as an error; everything else funnels into `Inactive`.
    pub async fn introspect(
        &self,
        req: IntrospectionRequest,
    ) -> Result<IntrospectionOutcome, ClientAuthFailed> {
        client_auth::authenticate_client(self.clients.as_ref(), &req.client_id, &req.client_secret)
            .await?;

        Ok(self.introspect_authenticated(&req).await)
    }

    async fn introspect_authenticated(&self, req: &IntrospectionRequest) -> IntrospectionOutcome {
        let Ok(header) = jwtcodec::parse_header(&req.token) else {
            return IntrospectionOutcome::Inactive;
        };

        let Ok(Some(resolved)) = self.jwks.resolve(header.kid.as_deref().unwrap_or_default()).await
        else {
            return IntrospectionOutcome::Inactive;
        };

        let key = VerifyingKey { alg: resolved.alg, key: (*resolved.decoding_key).clone() };
        let Ok(claims) =
            jwtcodec::verify_claims_value(&req.token, &key, &self.issuer, self.allow_none_alg)
        else {
            return IntrospectionOutcome::Inactive;
        };

        if self.strict_introspection {
            let aud_ok = claims
                .get("aud")
                .is_some_and(|aud| audience_contains(aud, &self.expected_audience));
            if !aud_ok {
                return IntrospectionOutcome::Inactive;
            }
            let claim_client_id = claims.get("client_id").and_then(|v| v.as_str());
            let Some(claim_client_id) = claim_client_id else {
                return IntrospectionOutcome::Inactive;
            };
            if self.clients.find(claim_client_id).await.is_none() {
                return IntrospectionOutcome::Inactive;
            }
        }

        let now = crate::util::now_ms() / 1000;
        let exp = claims.get("exp").and_then(|v| v.as_i64());
        let nbf = claims.get("nbf").and_then(|v| v.as_i64());
        let Some(exp) = exp else {
            return IntrospectionOutcome::Inactive;
        };
        if nbf.unwrap_or(0) > now || now >= exp {
            return IntrospectionOutcome::Inactive;
        }

        let is_refresh_hint = req.token_type_hint.as_deref() == Some("refresh_token");
        let jti = claims.get("jti").and_then(|v| v.as_str()).map(str::to_string);
        let sub = claims.get("sub").and_then(|v| v.as_str()).map(str::to_string);

        if is_refresh_hint {
            let rtv = claims.get("rtv").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let aud_str = claims.get("aud").and_then(|v| v.as_str());
            let (Some(sub), Some(aud_str)) = (sub.as_deref(), aud_str) else {
                return IntrospectionOutcome::Inactive;
            };
            if self.refresh_rotator.validate(sub, aud_str, rtv).await.is_none() {
                return IntrospectionOutcome::Inactive;
            }
        } else if let Some(jti) = jti.as_deref() {
            if self.revocation_store.is_revoked(jti).await {
                return IntrospectionOutcome::Inactive;
            }
        }

        IntrospectionOutcome::Active(ActiveResponse {
            active: true,
            scope: claims.get("scope").and_then(|v| v.as_str()).map(str::to_string),
            client_id: claims.get("client_id").and_then(|v| v.as_str()).map(str::to_string),
            token_type: "Bearer".to_string(),
            exp,
            iat: claims.get("iat").and_then(|v| v.as_i64()).unwrap_or(0),
            nbf,
            sub,
            aud: claims.get("aud").cloned(),
            iss: claims.get("iss").and_then(|v| v.as_str()).map(str::to_string),
            jti,
            act: claims.get("act").cloned(),
            resource: claims.get("resource").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

pub use crate::middleware::client_auth::parse_basic_auth;

/// Parses an `application/x-www-form-urlencoded` body into its fields,
/// falling back to an `Authorization: Basic` header for client credentials
/// when they aren't in the body (§4.6 steps 1-2).
pub fn parse_form_request(
    content_type: Option<&str>,
    body: &str,
    authorization_header: Option<&str>,
) -> Result<IntrospectionRequest, &'static str> {
    if !content_type
        .map(|c| c.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
    {
        return Err("invalid_request");
    }

    let fields: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();

    let token = fields.get("token").cloned().ok_or("invalid_request")?;
    let token_type_hint = fields.get("token_type_hint").cloned();

    let (client_id, client_secret) = client_auth::resolve_credentials(
        fields.get("client_id").map(String::as_str),
        fields.get("client_secret").map(String::as_str),
        authorization_header,
    )
    .ok_or("invalid_request")?;

    Ok(IntrospectionRequest { token, token_type_hint, client_id, client_secret })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_auth_header() {
        let header = format!(
            "Basic {}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"cli1:secret")
        );
        let (id, secret) = parse_basic_auth(&header).unwrap();
        assert_eq!(id, "cli1");
        assert_eq!(secret, "secret");
    }

    #[test]
    fn rejects_non_form_content_type() {
        let result = parse_form_request(Some("application/json"), "token=abc", None);
        assert_eq!(result, Err("invalid_request"));
    }

    #[test]
    fn extracts_fields_from_form_body() {
        let body = "token=abc123&token_type_hint=access_token&client_id=cli1&client_secret=sekret";
        let req = parse_form_request(Some("application/x-www-form-urlencoded"), body, None).unwrap();
        assert_eq!(req.token, "abc123");
        assert_eq!(req.client_id, "cli1");
    }
}
