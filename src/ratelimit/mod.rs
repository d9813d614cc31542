//! Rate Limit Counter actor (§4.5): fixed-window `increment` per client_ip,
//! sharded by `ShardMap` so that different client IPs serialize
//! independently. Atomicity comes solely from shard serialization, not from
//! any backend-level atomic op.
//!
//! Grounded on `services/rate_limit.rs`'s `RateLimitConfig`/`RateLimitResult`
//! struct naming; the windowing algorithm itself is NOT the teacher's
//! sliding-window-with-burst Lua script -- §4.5 specifies a plain fixed
//! window that resets wholesale on expiry, so that's what's implemented.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::actor::ShardMap;
use crate::kv::{self, KvStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_s: u64,
    pub max_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub count: u64,
    pub reset_at: i64,
    pub first_request_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub current: u64,
    pub limit: u64,
    pub reset_at: i64,
    pub retry_after: i64,
}

/// Records beyond this count trigger a cleanup sweep of stale entries (§4.5:
/// "self-throttled to fire when record count exceeds 10 000").
const CLEANUP_THRESHOLD: usize = 10_000;
/// A record is stale once this long past its window's reset (§4.5: "removes
/// records with `now >= record.reset_at + 3600 s`").
const STALE_GRACE_S: i64 = 3600;

fn durable_key(client_ip: &str) -> String {
    format!("f:ratelimit:{client_ip}")
}

pub struct RateLimitCounter {
    shards: ShardMap<RateLimitRecord>,
    kv: Arc<dyn KvStore>,
}

impl RateLimitCounter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { shards: ShardMap::new(), kv }
    }

    pub async fn increment(&self, client_ip: &str, config: RateLimitConfig) -> RateLimitResult {
        let mut guard = self.shards.lease_owned(client_ip).await;

        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &durable_key(client_ip)).await.ok().flatten();
        }

        let now = crate::util::now_ms() / 1000;
        let record = guard.get_or_insert_with(|| RateLimitRecord {
            count: 0,
            reset_at: now + config.window_s as i64,
            first_request_at: now,
        });

        if now >= record.reset_at {
            record.count = 1;
            record.reset_at = now + config.window_s as i64;
            record.first_request_at = now;
        } else {
            record.count += 1;
        }

        let snapshot = *record;
        let _ = kv::put_json(&*self.kv, &durable_key(client_ip), &snapshot, None).await;
        drop(guard);

        let allowed = snapshot.count <= config.max_requests;
        let retry_after = if allowed { 0 } else { snapshot.reset_at - now };

        if self.shards.shard_count() > CLEANUP_THRESHOLD {
            self.cleanup(now, client_ip).await;
        }

        RateLimitResult {
            allowed,
            current: snapshot.count,
            limit: config.max_requests,
            reset_at: snapshot.reset_at,
            retry_after,
        }
    }

    /// Self-throttled sweep (§4.5): drops shards whose window lapsed more
    /// than `STALE_GRACE_S` ago. Skips `skip_key` -- its lease was just held
    /// by the caller and re-leasing it here would self-deadlock.
    async fn cleanup(&self, now: i64, skip_key: &str) {
        for key in self.shards.keys() {
            if key == skip_key {
                continue;
            }
            let guard = self.shards.lease_owned(&key).await;
            let stale = guard.as_ref().is_some_and(|r| now >= r.reset_at + STALE_GRACE_S);
            drop(guard);
            if stale {
                self.shards.remove_shard(&key);
                let _ = self.kv.delete(&durable_key(&key)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn counter() -> RateLimitCounter {
        RateLimitCounter::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn s6_rate_limit_accuracy() {
        let counter = counter();
        let config = RateLimitConfig { window_s: 60, max_requests: 100 };
        let mut allowed_count = 0;
        let mut denied_count = 0;
        for _ in 0..110 {
            let result = counter.increment("1.2.3.4", config).await;
            if result.allowed {
                allowed_count += 1;
            } else {
                denied_count += 1;
                assert!(result.retry_after >= 1 && result.retry_after <= 60);
            }
        }
        assert_eq!(allowed_count, 100);
        assert_eq!(denied_count, 10);
    }

    #[tokio::test]
    async fn different_client_ips_have_independent_windows() {
        let counter = counter();
        let config = RateLimitConfig { window_s: 60, max_requests: 1 };
        assert!(counter.increment("1.1.1.1", config).await.allowed);
        assert!(counter.increment("2.2.2.2", config).await.allowed);
        assert!(!counter.increment("1.1.1.1", config).await.allowed);
    }
}
