//! `POST /revoke` (RFC 7009, §6). Always 200 with an empty body except on
//! client-auth failure (401).

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::app::AppState;
use crate::errors::CoreError;
use crate::revocation;

pub async fn revoke(
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

    let req = match revocation::parse_form_request(content_type, &body, authorization) {
        Ok(req) => req,
        Err(code) => return CoreError::InvalidRequest(code.to_string()).into_response(),
    };

    match state.revocation_engine.revoke(req).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => CoreError::InvalidClient.into_response(),
    }
}
