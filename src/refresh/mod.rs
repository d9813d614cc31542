//! Refresh Token Rotator actor (§4.4) -- the most security-critical
//! component. Sharded by `{user_id}:{client_id}` (Data Model §3: "one
//! rotation chain per (user_id, client_id) shard").
//!
//! Grounded primarily on `services/jwt.rs::rotate_refresh_token`'s
//! theft-detection algorithm and `models/refresh_token.rs`'s
//! `detect_token_reuse`/`revoke_token_family` concepts, restructured from
//! Postgres row-locking (`validate_and_lock` FOR UPDATE) onto the in-memory
//! `ShardMap` actor with an in-memory version/jti comparison, since the
//! spec's family record is a compact rotation counter, not a per-token
//! history table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::actor::ShardMap;
use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::errors::{CoreError, InvalidGrantReason};
use crate::kv::{self, KvStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFamily {
    pub user_id: String,
    pub client_id: String,
    pub version: u32,
    pub last_jti: String,
    pub last_used_at: i64,
    pub expires_at: i64,
    pub allowed_scope: String,
    pub generation: Option<u32>,
    pub shard_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CreateFamilyRequest {
    pub jti: String,
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    pub ttl_s: i64,
    pub generation: Option<u32>,
    pub shard_index: Option<u32>,
    /// Whether an existing live family for this `(user_id, client_id)` may
    /// be clobbered. Defaults to `false` in practice; the spec leaves the
    /// collaborator's permission policy unspecified beyond this flag.
    pub allow_reinit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFamilyResponse {
    pub version: u32,
    pub new_jti: String,
    pub expires_in: i64,
    pub allowed_scope: String,
}

#[derive(Debug, Clone)]
pub struct RotateRequest {
    pub incoming_version: u32,
    pub incoming_jti: String,
    pub user_id: String,
    pub client_id: String,
    pub requested_scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateResponse {
    pub new_version: u32,
    pub new_jti: String,
    pub expires_in: i64,
    pub allowed_scope: String,
}

fn shard_key(user_id: &str, client_id: &str) -> String {
    format!("{user_id}:{client_id}")
}

fn durable_key(user_id: &str, client_id: &str) -> String {
    format!("f:refresh:{user_id}:{client_id}")
}

/// `v{generation}_{shard_index}_rt_{uuid}` when sharding metadata is set,
/// so inbound routing can resolve a shard statelessly (§4.4).
fn mint_jti(generation: Option<u32>, shard_index: Option<u32>) -> String {
    let uuid = crate::util::new_uuid();
    match (generation, shard_index) {
        (Some(g), Some(s)) => format!("v{g}_{s}_rt_{uuid}"),
        _ => format!("rt_{uuid}"),
    }
}

/// `requested ⊆ allowed` as sets of space-delimited scope tokens (testable
/// property 6: scope monotonicity).
fn scope_subset(requested: &str, allowed: &str) -> bool {
    let allowed: std::collections::HashSet<&str> = allowed.split_whitespace().collect();
    requested.split_whitespace().all(|tok| allowed.contains(tok))
}

pub struct RefreshRotator {
    shards: ShardMap<TokenFamily>,
    kv: Arc<dyn KvStore>,
    audit: Arc<dyn AuditSink>,
}

impl RefreshRotator {
    pub fn new(kv: Arc<dyn KvStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { shards: ShardMap::new(), kv, audit }
    }

    pub async fn create_family(
        &self,
        req: CreateFamilyRequest,
    ) -> Result<CreateFamilyResponse, CoreError> {
        let key = shard_key(&req.user_id, &req.client_id);
        let mut guard = self.shards.lease_owned(&key).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &durable_key(&req.user_id, &req.client_id)).await?;
        }

        if guard.is_some() && !req.allow_reinit {
            // A live family already exists and the caller hasn't opted into
            // clobbering it (§4.4 create_family). Not a protocol-visible
            // failure mode -- this is an internal collaborator contract.
            return Err(CoreError::Forbidden);
        }

        let now = crate::util::now_ms() / 1000;
        let family = TokenFamily {
            user_id: req.user_id.clone(),
            client_id: req.client_id.clone(),
            version: 1,
            last_jti: req.jti.clone(),
            last_used_at: now,
            expires_at: now + req.ttl_s,
            allowed_scope: req.scope.clone(),
            generation: req.generation,
            shard_index: req.shard_index,
        };

        kv::put_json(
            &*self.kv,
            &durable_key(&req.user_id, &req.client_id),
            &family,
            Some(req.ttl_s.max(0) as u64),
        )
        .await?;
        let response = CreateFamilyResponse {
            version: family.version,
            new_jti: req.jti,
            expires_in: req.ttl_s,
            allowed_scope: family.allowed_scope.clone(),
        };
        *guard = Some(family);

        Ok(response)
    }

    pub async fn rotate(&self, req: RotateRequest) -> Result<RotateResponse, CoreError> {
        let key = shard_key(&req.user_id, &req.client_id);
        let mut guard = self.shards.lease_owned(&key).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &durable_key(&req.user_id, &req.client_id)).await?;
        }

        let Some(family) = guard.as_ref() else {
            return Err(CoreError::InvalidGrant(InvalidGrantReason::FamilyNotFound));
        };

        if family.client_id != req.client_id {
            return Err(CoreError::InvalidGrant(InvalidGrantReason::ClientMismatch));
        }

        let now = crate::util::now_ms() / 1000;
        if now >= family.expires_at {
            let user_id = family.user_id.clone();
            self.delete_family(&key, &req.user_id, &req.client_id).await;
            self.audit
                .record(AuditEvent::new(
                    AuditKind::Rotated,
                    &key,
                    serde_json::json!({"reason": "expired", "user_id": user_id}),
                ))
                .await;
            return Err(CoreError::InvalidGrant(InvalidGrantReason::Expired));
        }

        if req.incoming_version < family.version {
            self.delete_family(&key, &req.user_id, &req.client_id).await;
            self.audit
                .record(AuditEvent::new(
                    AuditKind::TheftDetected,
                    &key,
                    serde_json::json!({"reason": "version_replay", "incoming_version": req.incoming_version}),
                ))
                .await;
            return Err(CoreError::InvalidGrant(InvalidGrantReason::TheftDetected));
        }

        if req.incoming_version != family.version {
            return Err(CoreError::InvalidGrant(InvalidGrantReason::VersionMismatch));
        }

        if req.incoming_jti != family.last_jti {
            self.delete_family(&key, &req.user_id, &req.client_id).await;
            self.audit
                .record(AuditEvent::new(
                    AuditKind::TheftDetected,
                    &key,
                    serde_json::json!({"reason": "jti_mismatch", "incoming_jti": req.incoming_jti}),
                ))
                .await;
            return Err(CoreError::InvalidGrant(InvalidGrantReason::TheftDetected));
        }

        if let Some(ref requested) = req.requested_scope {
            if !scope_subset(requested, &family.allowed_scope) {
                return Err(CoreError::InvalidScope);
            }
        }

        let family = guard.as_mut().unwrap();
        let new_jti = mint_jti(family.generation, family.shard_index);
        family.version += 1;
        family.last_jti = new_jti.clone();
        family.last_used_at = now;
        let snapshot = family.clone();

        kv::put_json(
            &*self.kv,
            &durable_key(&req.user_id, &req.client_id),
            &snapshot,
            Some((snapshot.expires_at - now).max(1) as u64),
        )
        .await?;

        self.audit
            .record(AuditEvent::new(
                AuditKind::Rotated,
                &key,
                serde_json::json!({"new_version": snapshot.version}),
            ))
            .await;

        Ok(RotateResponse {
            new_version: snapshot.version,
            new_jti,
            expires_in: snapshot.expires_at - now,
            allowed_scope: snapshot.allowed_scope,
        })
    }

    pub async fn revoke_family(&self, user_id: &str, client_id: &str, reason: Option<&str>) {
        let key = shard_key(user_id, client_id);
        self.delete_family(&key, user_id, client_id).await;
        self.audit
            .record(AuditEvent::new(
                AuditKind::FamilyRevoked,
                &key,
                serde_json::json!({"reason": reason.unwrap_or("explicit_revoke")}),
            ))
            .await;
    }

    /// Search the hot index for the family whose `last_jti` matches, and
    /// delete it if found (§4.4: "search hot index ... delete the whole
    /// family (best-practice) if found").
    pub async fn revoke_by_jti(&self, jti: &str, reason: Option<&str>) -> bool {
        for key in self.shards.keys() {
            let guard = self.shards.lease_owned(&key).await;
            let matches = guard.as_ref().is_some_and(|f| f.last_jti == jti);
            let (user_id, client_id) = guard
                .as_ref()
                .map(|f| (f.user_id.clone(), f.client_id.clone()))
                .unwrap_or_default();
            drop(guard);
            if matches {
                self.delete_family(&key, &user_id, &client_id).await;
                self.audit
                    .record(AuditEvent::new(
                        AuditKind::FamilyRevoked,
                        &key,
                        serde_json::json!({"reason": reason.unwrap_or("revoke_by_jti"), "jti": jti}),
                    ))
                    .await;
                return true;
            }
        }
        false
    }

    /// One pass over `jtis`, with a single batched audit write for the
    /// whole call (§4.4: "one pass; batched audit writes") rather than N
    /// individually-synchronous `family_revoked` writes.
    pub async fn batch_revoke(&self, jtis: &[String], reason: Option<&str>) -> usize {
        let mut events = Vec::new();
        let mut revoked = 0;
        for jti in jtis {
            for key in self.shards.keys() {
                let guard = self.shards.lease_owned(&key).await;
                let matches = guard.as_ref().is_some_and(|f| f.last_jti == *jti);
                let (user_id, client_id) = guard
                    .as_ref()
                    .map(|f| (f.user_id.clone(), f.client_id.clone()))
                    .unwrap_or_default();
                drop(guard);
                if matches {
                    self.delete_family(&key, &user_id, &client_id).await;
                    events.push(AuditEvent::new(
                        AuditKind::FamilyRevoked,
                        &key,
                        serde_json::json!({"reason": reason.unwrap_or("batch_revoke"), "jti": jti}),
                    ));
                    revoked += 1;
                    break;
                }
            }
        }
        if let Err(e) = self.audit.persist_batch(&events).await {
            tracing::error!("batch_revoke audit write failed: {}", e);
        }
        revoked
    }

    /// Read-only; no mutation (§4.4 `validate`).
    pub async fn validate(
        &self,
        user_id: &str,
        client_id: &str,
        version: u32,
    ) -> Option<TokenFamily> {
        let key = shard_key(user_id, client_id);
        let mut guard = self.shards.lease_owned(&key).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &durable_key(user_id, client_id)).await.ok().flatten();
        }
        guard
            .as_ref()
            .filter(|f| f.client_id == client_id && f.version == version)
            .cloned()
    }

    async fn delete_family(&self, shard_key: &str, user_id: &str, client_id: &str) {
        self.shards.remove_shard(shard_key);
        let _ = self.kv.delete(&durable_key(user_id, client_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::kv::InMemoryKv;

    fn rotator() -> (RefreshRotator, Arc<InMemoryAuditSink>) {
        let audit = Arc::new(InMemoryAuditSink::new());
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        (RefreshRotator::new(kv, audit.clone()), audit)
    }

    #[tokio::test]
    async fn s3_refresh_theft_scenario() {
        let (rotator, _audit) = rotator();
        rotator
            .create_family(CreateFamilyRequest {
                jti: "J1".into(),
                user_id: "U1".into(),
                client_id: "cli1".into(),
                scope: "openid offline_access".into(),
                ttl_s: 2_592_000,
                generation: None,
                shard_index: None,
                allow_reinit: false,
            })
            .await
            .unwrap();

        let r1 = rotator
            .rotate(RotateRequest {
                incoming_version: 1,
                incoming_jti: "J1".into(),
                user_id: "U1".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(r1.new_version, 2);
        let jti2 = r1.new_jti;

        let r2 = rotator
            .rotate(RotateRequest {
                incoming_version: 2,
                incoming_jti: jti2,
                user_id: "U1".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(r2.new_version, 3);
        let jti3 = r2.new_jti;

        let replay = rotator
            .rotate(RotateRequest {
                incoming_version: 1,
                incoming_jti: "J1".into(),
                user_id: "U1".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await;
        assert!(matches!(
            replay,
            Err(CoreError::InvalidGrant(InvalidGrantReason::TheftDetected))
        ));

        let after_theft = rotator
            .rotate(RotateRequest {
                incoming_version: 3,
                incoming_jti: jti3,
                user_id: "U1".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await;
        assert!(matches!(
            after_theft,
            Err(CoreError::InvalidGrant(InvalidGrantReason::FamilyNotFound))
        ));
    }

    #[tokio::test]
    async fn theft_detected_writes_synchronous_audit() {
        let (rotator, audit) = rotator();
        rotator
            .create_family(CreateFamilyRequest {
                jti: "J1".into(),
                user_id: "U2".into(),
                client_id: "cli1".into(),
                scope: "openid".into(),
                ttl_s: 3600,
                generation: None,
                shard_index: None,
                allow_reinit: false,
            })
            .await
            .unwrap();
        rotator
            .rotate(RotateRequest {
                incoming_version: 1,
                incoming_jti: "J1".into(),
                user_id: "U2".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await
            .unwrap();

        // replay the original, now-superseded jti -> jti_mismatch theft path
        let result = rotator
            .rotate(RotateRequest {
                incoming_version: 2,
                incoming_jti: "J1".into(),
                user_id: "U2".into(),
                client_id: "cli1".into(),
                requested_scope: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(CoreError::InvalidGrant(InvalidGrantReason::TheftDetected))
        ));
        let events = audit.events().await;
        assert!(events.iter().any(|e| e.kind == AuditKind::TheftDetected));
    }

    #[tokio::test]
    async fn scope_monotonicity_enforced() {
        let (rotator, _audit) = rotator();
        rotator
            .create_family(CreateFamilyRequest {
                jti: "J1".into(),
                user_id: "U3".into(),
                client_id: "cli1".into(),
                scope: "openid profile".into(),
                ttl_s: 3600,
                generation: None,
                shard_index: None,
                allow_reinit: false,
            })
            .await
            .unwrap();

        let result = rotator
            .rotate(RotateRequest {
                incoming_version: 1,
                incoming_jti: "J1".into(),
                user_id: "U3".into(),
                client_id: "cli1".into(),
                requested_scope: Some("openid profile admin".into()),
            })
            .await;
        assert!(matches!(result, Err(CoreError::InvalidScope)));
    }

    #[tokio::test]
    async fn jti_format_includes_generation_and_shard() {
        assert_eq!(mint_jti(None, None).starts_with("rt_"), true);
        let sharded = mint_jti(Some(2), Some(7));
        assert!(sharded.starts_with("v2_7_rt_"));
    }
}
