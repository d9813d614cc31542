//! The protocol-visible error taxonomy of spec §7, generalized from the
//! teacher's `utils/service_error.rs` / `utils/auth_errors.rs` status-code
//! mapping pattern. Variant names are the protocol vocabulary itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Core error kind. Components return this; protocol engines translate it
/// into the oracle-free / always-200 shapes §7 mandates rather than letting
/// it leak directly as an HTTP response in those paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client")]
    InvalidClient,

    #[error("invalid_grant: {0}")]
    InvalidGrant(InvalidGrantReason),

    #[error("invalid_scope")]
    InvalidScope,

    #[error("too_many_codes")]
    TooManyCodes,

    #[error("not_found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("server_error: {0}")]
    ServerError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidGrantReason {
    CodeNotFoundOrUsed,
    ClientMismatch,
    RedirectUriMismatch,
    PkceMismatch,
    FamilyNotFound,
    Expired,
    VersionMismatch,
    TheftDetected,
}

impl InvalidGrantReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeNotFoundOrUsed => "code_not_found_or_used",
            Self::ClientMismatch => "client_mismatch",
            Self::RedirectUriMismatch => "redirect_uri_mismatch",
            Self::PkceMismatch => "pkce_mismatch",
            Self::FamilyNotFound => "family_not_found",
            Self::Expired => "expired",
            Self::VersionMismatch => "version_mismatch",
            Self::TheftDetected => "theft_detected",
        }
    }

    pub fn is_theft(&self) -> bool {
        matches!(self, Self::TheftDetected)
    }
}

impl std::fmt::Display for InvalidGrantReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::InvalidGrant(_) => StatusCode::BAD_REQUEST,
            Self::InvalidScope => StatusCode::BAD_REQUEST,
            Self::TooManyCodes => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::TooManyCodes => "too_many_codes",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::ServerError(_) => "server_error",
        }
    }

    pub fn is_theft_detected(&self) -> bool {
        matches!(self, Self::InvalidGrant(r) if r.is_theft())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.error_code().to_string(),
            error_description: match &self {
                Self::InvalidRequest(msg) => Some(msg.clone()),
                Self::InvalidGrant(reason) => Some(reason.to_string()),
                Self::ServerError(msg) => Some(msg.clone()),
                _ => None,
            },
            action: if self.is_theft_detected() {
                Some("family_revoked".to_string())
            } else {
                None
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::kv::KvError> for CoreError {
    fn from(e: crate::kv::KvError) -> Self {
        CoreError::ServerError(e.to_string())
    }
}

impl From<diesel::result::Error> for CoreError {
    fn from(e: diesel::result::Error) -> Self {
        CoreError::ServerError(e.to_string())
    }
}
