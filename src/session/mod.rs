//! Session Manager actor (§4.2). Sharded by `session_id`; hot tier is the
//! in-process `ShardMap`, cold tier is the durable KV store, raced with a
//! 100 ms timeout on lookup miss.
//!
//! No teacher equivalent exists (the teacher is stateless-JWT-only with no
//! server-side session store); grounded in the KV adapter
//! (`db/redis_pool.rs`'s get/set-with-ttl idiom) for the cold tier and the
//! shared `ShardMap` actor primitive for the hot tier.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::actor::ShardMap;
use crate::kv::{self, KvStore};

/// Cold-read race window (§4.2 `get`: "race a cold read against a 100 ms timeout").
const COLD_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Durable-write retry budget for `invalidate` (§4.2: "retried with
/// exponential backoff (<=3 attempts) because stale persisted data is a
/// security risk").
const INVALIDATE_RETRIES: u32 = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub amr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: i64,
    pub data: SessionData,
}

fn canonical_key(id: &str) -> String {
    format!("f:session:{id}")
}

fn user_index_key(user_id: &str, id: &str) -> String {
    format!("f:session:byuser:{user_id}:{id}")
}

fn user_index_prefix(user_id: &str) -> String {
    format!("f:session:byuser:{user_id}:")
}

pub struct SessionManager {
    shards: ShardMap<Session>,
    kv: Arc<dyn KvStore>,
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { shards: ShardMap::new(), kv }
    }

    pub async fn create(&self, user_id: &str, ttl_s: i64, data: SessionData) -> Session {
        let now = crate::util::now_ms() / 1000;
        let session = Session {
            id: crate::util::new_uuid().to_string(),
            user_id: user_id.to_string(),
            expires_at: now + ttl_s,
            created_at: now,
            data,
        };

        let mut guard = self.shards.lease_owned(&session.id).await;
        *guard = Some(session.clone());
        drop(guard);

        // Durable write failures on create are logged but don't fail the
        // call -- the hot copy is authoritative in-process (§4.2).
        if let Err(e) =
            kv::put_json(&*self.kv, &canonical_key(&session.id), &session, Some(ttl_s.max(0) as u64)).await
        {
            warn!("session create: durable write failed for {}: {}", session.id, e);
        }
        let _ = kv::put_json(
            &*self.kv,
            &user_index_key(user_id, &session.id),
            &session.id,
            Some(ttl_s.max(0) as u64),
        )
        .await;

        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let mut guard = self.shards.lease_owned(session_id).await;
        if guard.is_none() {
            let cold = tokio::time::timeout(
                COLD_READ_TIMEOUT,
                kv::get_json::<Session, _>(&*self.kv, &canonical_key(session_id)),
            )
            .await;
            if let Ok(Ok(Some(session))) = cold {
                *guard = Some(session);
            }
        }

        let now = crate::util::now_ms() / 1000;
        match guard.as_ref() {
            Some(session) if session.expires_at > now => Some(session.clone()),
            Some(_) => {
                *guard = None;
                drop(guard);
                let _ = self.kv.delete(&canonical_key(session_id)).await;
                None
            }
            None => None,
        }
    }

    pub async fn extend(&self, session_id: &str, add_s: i64) -> Option<Session> {
        let mut guard = self.shards.lease_owned(session_id).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &canonical_key(session_id)).await.ok().flatten();
        }

        let now = crate::util::now_ms() / 1000;
        let session = guard.as_mut()?;
        if session.expires_at <= now {
            *guard = None;
            return None;
        }
        session.expires_at += add_s;
        let snapshot = session.clone();

        let ttl = (snapshot.expires_at - now).max(1) as u64;
        if let Err(e) = kv::put_json(&*self.kv, &canonical_key(session_id), &snapshot, Some(ttl)).await {
            warn!("session extend: durable write failed for {}: {}", session_id, e);
        }

        Some(snapshot)
    }

    pub async fn invalidate(&self, session_id: &str) -> bool {
        let mut guard = self.shards.lease_owned(session_id).await;
        let user_id = guard.as_ref().map(|s| s.user_id.clone());
        let existed = guard.is_some() || self.kv.get_raw(&canonical_key(session_id)).await.ok().flatten().is_some();
        *guard = None;
        drop(guard);

        self.delete_durable_with_retry(session_id).await;
        if let Some(user_id) = user_id {
            let _ = self.kv.delete(&user_index_key(&user_id, session_id)).await;
        }

        existed
    }

    pub async fn invalidate_batch(&self, ids: &[String]) -> (usize, Vec<String>) {
        let mut deleted = 0;
        let mut failed = Vec::new();
        for id in ids {
            if self.invalidate(id).await {
                deleted += 1;
            } else {
                failed.push(id.clone());
            }
        }
        let keys: Vec<String> = ids.iter().map(|id| canonical_key(id)).collect();
        let _ = self.kv.delete_many(&keys).await;
        (deleted, failed)
    }

    /// Union of hot entries for `user_id` and cold entries not already hot,
    /// filtered to unexpired (§4.2). Not a hot-path operation (§9 Design
    /// Notes): a full hot-shard scan plus a durable prefix scan.
    pub async fn list_user_sessions(&self, user_id: &str) -> Vec<Session> {
        let now = crate::util::now_ms() / 1000;
        let mut seen = std::collections::HashSet::new();
        let mut sessions = Vec::new();

        for key in self.shards.keys() {
            let guard = self.shards.lease_owned(&key).await;
            if let Some(session) = guard.as_ref() {
                if session.user_id == user_id && session.expires_at > now {
                    seen.insert(session.id.clone());
                    sessions.push(session.clone());
                }
            }
        }

        if let Ok(index_keys) = self.kv.scan_prefix(&user_index_prefix(user_id)).await {
            for index_key in index_keys {
                if let Ok(Some(id)) = kv::get_json::<String, _>(&*self.kv, &index_key).await {
                    if seen.contains(&id) {
                        continue;
                    }
                    if let Ok(Some(session)) =
                        kv::get_json::<Session, _>(&*self.kv, &canonical_key(&id)).await
                    {
                        if session.expires_at > now {
                            sessions.push(session);
                        }
                    }
                }
            }
        }

        sessions
    }

    async fn delete_durable_with_retry(&self, session_id: &str) {
        let mut attempt = 0;
        loop {
            match self.kv.delete(&canonical_key(session_id)).await {
                Ok(()) => return,
                Err(e) if attempt < INVALIDATE_RETRIES => {
                    attempt += 1;
                    warn!(
                        "session invalidate durable delete failed (attempt {}/{}): {}",
                        attempt, INVALIDATE_RETRIES, e
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => {
                    warn!("session invalidate durable delete permanently failed for {}: {}", session_id, e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn s4_session_revoke_scenario() {
        let manager = manager();
        let session = manager.create("U1", 3600, SessionData::default()).await;

        let fetched = manager.get(&session.id).await;
        assert!(fetched.is_some());

        assert!(manager.invalidate(&session.id).await);
        assert!(manager.get(&session.id).await.is_none());
        assert!(!manager.invalidate(&session.id).await);
    }

    #[tokio::test]
    async fn expired_session_returns_none() {
        let manager = manager();
        let session = manager.create("U1", -1, SessionData::default()).await;
        assert!(manager.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn list_user_sessions_filters_to_owner() {
        let manager = manager();
        let s1 = manager.create("U1", 3600, SessionData::default()).await;
        let _s2 = manager.create("U2", 3600, SessionData::default()).await;

        let sessions = manager.list_user_sessions("U1").await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, s1.id);
    }

    #[tokio::test]
    async fn extend_adds_to_expiry() {
        let manager = manager();
        let session = manager.create("U1", 100, SessionData::default()).await;
        let extended = manager.extend(&session.id, 200).await.unwrap();
        assert_eq!(extended.expires_at, session.expires_at + 200);
    }
}
