//! Diesel model for the `audit_events` table. Writes are idempotent UPSERT by
//! id (§5: "writes are idempotent (UPSERT by id)") so at-least-once batched
//! delivery and retried synchronous writes are both safe to replay.

use diesel::prelude::*;

use crate::schema::audit_events;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_events)]
pub struct NewAuditEventRow {
    pub id: uuid::Uuid,
    pub kind: String,
    pub shard_key: String,
    pub tenant_id: Option<uuid::Uuid>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub detail: serde_json::Value,
}

impl From<&super::AuditEvent> for NewAuditEventRow {
    fn from(e: &super::AuditEvent) -> Self {
        Self {
            id: e.id,
            kind: e.kind.as_str().to_string(),
            shard_key: e.shard_key.clone(),
            tenant_id: e.tenant_id,
            occurred_at: e.occurred_at,
            detail: e.detail.clone(),
        }
    }
}
