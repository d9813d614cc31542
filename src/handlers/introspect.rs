//! `POST /introspect` (RFC 7662, §6). Translates the engine's oracle-free
//! outcome into the HTTP contract: 200 with `{active:true,...}` or
//! `{active:false}` on every non-auth failure, 401 only when the client
//! itself failed to authenticate.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::app::AppState;
use crate::errors::CoreError;
use crate::introspection::{self, IntrospectionOutcome};

pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let req = match introspection::parse_form_request(content_type, &body, authorization) {
        Ok(req) => req,
        Err(code) => return CoreError::InvalidRequest(code.to_string()).into_response(),
    };

    match state.introspection_engine.introspect(req).await {
        Ok(IntrospectionOutcome::Active(active)) => (StatusCode::OK, Json(active)).into_response(),
        Ok(IntrospectionOutcome::Inactive) => {
            (StatusCode::OK, Json(introspection::InactiveResponse::default())).into_response()
        }
        Err(_) => CoreError::InvalidClient.into_response(),
    }
}
