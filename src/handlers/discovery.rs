//! OpenID Connect Discovery 1.0 and JWKS publication (§6 "Discovery
//! document" / "JWKS document").
//!
//! Grounded on `handlers/docs/mod.rs`'s static-JSON-document pattern, reused
//! here for a protocol document instead of an OpenAPI spec.

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub grant_types_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
}

/// `GET /.well-known/openid-configuration`. `grant_types_supported` is
/// filtered by the two-layer model (§6): ephemeral-auth grants
/// (`client_credentials`) are always advertised; the human-auth
/// authorization-code grant is advertised alongside it since this core
/// always carries an Authorization Code Store (§4.3).
pub async fn discovery_document(State(state): State<AppState>) -> impl IntoResponse {
    let issuer = state.config.issuer_url.clone();
    let alg = match state.config.jwt.alg {
        crate::app_config::SigningAlg::Rs256 => "RS256",
        crate::app_config::SigningAlg::Es256 => "ES256",
    };

    Json(DiscoveryDocument {
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        introspection_endpoint: format!("{issuer}/introspect"),
        revocation_endpoint: format!("{issuer}/revoke"),
        grant_types_supported: vec!["authorization_code", "refresh_token", "client_credentials"],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic",
            "client_secret_post",
        ],
        id_token_signing_alg_values_supported: vec![alg],
        issuer,
    })
}

#[derive(Debug, Serialize)]
struct JwksDocument {
    keys: Vec<crate::jwks::JwkEntry>,
}

/// `GET /.well-known/jwks.json` (§6: `Cache-Control: public, max-age=300`).
/// Always goes straight to the authoritative key manager -- see
/// `JwksCache::all_public_keys`.
pub async fn jwks_document(State(state): State<AppState>) -> impl IntoResponse {
    match state.jwks.all_public_keys().await {
        Ok(keys) => (
            [(header::CACHE_CONTROL, "public, max-age=300")],
            Json(JwksDocument { keys }),
        )
            .into_response(),
        Err(e) => crate::errors::CoreError::ServerError(e.to_string()).into_response(),
    }
}
