//! Revoked Access Token Store (§3 Data Model: "`jti -> revoked_until`.
//! Evicted after `revoked_until`"). Used by introspection (§4.6 step 9) and
//! the revocation engine (§4.7).
//!
//! Grounded on `services/jwt.rs::logout_token`/`is_token_blacklisted`'s
//! Redis blacklist-by-jti-with-TTL pattern, reused almost directly and put
//! behind the same `ShardMap` actor discipline as the rest of §4.

use std::sync::Arc;

use crate::actor::ShardMap;
use crate::kv::{self, KvStore};

fn durable_key(jti: &str) -> String {
    format!("t:revoked:{jti}")
}

pub struct RevocationStore {
    shards: ShardMap<i64>,
    kv: Arc<dyn KvStore>,
}

impl RevocationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { shards: ShardMap::new(), kv }
    }

    /// Mark `jti` revoked until `revoked_until` (unix seconds). `ttl_s`
    /// typically mirrors `token_expiry_s` (§6) since there's no point
    /// remembering a revocation past the token's natural expiry.
    pub async fn revoke(&self, jti: &str, revoked_until: i64) {
        let ttl = (revoked_until - crate::util::now_ms() / 1000).max(1) as u64;
        let mut guard = self.shards.lease_owned(jti).await;
        *guard = Some(revoked_until);
        drop(guard);
        let _ = kv::put_json(&*self.kv, &durable_key(jti), &revoked_until, Some(ttl)).await;
    }

    pub async fn is_revoked(&self, jti: &str) -> bool {
        let mut guard = self.shards.lease_owned(jti).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &durable_key(jti)).await.ok().flatten();
        }

        let now = crate::util::now_ms() / 1000;
        match *guard {
            Some(revoked_until) if revoked_until > now => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn store() -> RevocationStore {
        RevocationStore::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn revoked_jti_is_reported_until_expiry() {
        let store = store();
        let now = crate::util::now_ms() / 1000;
        store.revoke("jti-1", now + 3600).await;
        assert!(store.is_revoked("jti-1").await);
    }

    #[tokio::test]
    async fn past_revoked_until_is_treated_as_not_revoked() {
        let store = store();
        let now = crate::util::now_ms() / 1000;
        store.revoke("jti-2", now - 10).await;
        assert!(!store.is_revoked("jti-2").await);
    }

    #[tokio::test]
    async fn unknown_jti_is_not_revoked() {
        let store = store();
        assert!(!store.is_revoked("never-seen").await);
    }
}
