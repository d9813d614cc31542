// HTTP handlers for the provider core's external interfaces (§6).

pub mod discovery;
pub mod introspect;
pub mod revoke;

use crate::app::AppState;
use axum::{routing::get, routing::post, Router};

/// The external interfaces §6 actually specifies: discovery, JWKS,
/// introspection, revocation.
pub fn protocol_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(discovery::discovery_document),
        )
        .route("/.well-known/jwks.json", get(discovery::jwks_document))
        .route("/introspect", post(introspect::introspect))
        .route("/revoke", post(revoke::revoke))
}
