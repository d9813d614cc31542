//! Audit trail for §4.4 / §10.1's dual discipline: `theft_detected` and
//! `family_revoked` are written synchronously with retry before the call that
//! triggered them returns; every other event is pushed onto a channel and
//! flushed as a batch at least every 100 ms.
//!
//! Grounded on `utils/audit_logger.rs`'s JSON-via-`tracing` idiom, generalized
//! into a real persisted sink since the spec requires the synchronous events
//! to survive a crash, not merely be logged.

pub mod schema_model;
pub mod sink;

pub use sink::{AuditSink, InMemoryAuditSink, PostgresAuditSink};

use serde::Serialize;
use uuid::Uuid;

/// The kinds named by the spec's audit discipline (§4.4, Data Model §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Rotated,
    TheftDetected,
    FamilyRevoked,
    SessionInvalidated,
    CodeConsumed,
    TokenRevoked,
}

impl AuditKind {
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::TheftDetected | Self::FamilyRevoked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotated => "rotated",
            Self::TheftDetected => "theft_detected",
            Self::FamilyRevoked => "family_revoked",
            Self::SessionInvalidated => "session_invalidated",
            Self::CodeConsumed => "code_consumed",
            Self::TokenRevoked => "token_revoked",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    pub shard_key: String,
    pub tenant_id: Option<Uuid>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, shard_key: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            shard_key: shard_key.into(),
            tenant_id: None,
            occurred_at: chrono::Utc::now(),
            detail,
        }
    }
}
