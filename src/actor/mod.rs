//! Sharded single-writer actor primitive.
//!
//! Every stateful core (session manager, authorization code store, refresh
//! token rotator, rate limit counter) shards its records by a string key and
//! guarantees that operations on one shard are serialized while operations on
//! different shards proceed concurrently. This module provides that guarantee
//! as a reusable primitive rather than re-deriving it per component.
//!
//! The scheduling contract comes from the spec, not from this type: one
//! `tokio::sync::Mutex` per shard, held for the full read -> mutate ->
//! durable-write critical section. Two operations on the same shard cannot
//! interleave; operations on different shards never contend on the same lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A concurrent map of shard key -> serialized shard state.
///
/// `S` is hydrated lazily: a shard's slot is created empty on first access and
/// populated by the caller (typically from the durable store) before use.
pub struct ShardMap<S> {
    shards: DashMap<String, Arc<Mutex<Option<S>>>>,
}

impl<S> Default for ShardMap<S> {
    fn default() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }
}

impl<S> ShardMap<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shards currently materialized (including hydrated-empty ones).
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn contains_shard(&self, key: &str) -> bool {
        self.shards.contains_key(key)
    }

    pub fn remove_shard(&self, key: &str) {
        self.shards.remove(key);
    }

    /// All currently-materialized shard keys. Used by background sweeps and
    /// by `revoke_by_jti`-style scans that must search the hot index.
    pub fn keys(&self) -> Vec<String> {
        self.shards.iter().map(|e| e.key().clone()).collect()
    }

    fn arc_for(&self, key: &str) -> Arc<Mutex<Option<S>>> {
        self.shards
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Acquire the exclusive, ownable lease for `key`. Unlike a borrowed
    /// `MutexGuard`, the owned guard does not borrow from `self`, so it can be
    /// held across further `.await` points inside the caller without pinning
    /// the `ShardMap` borrow -- exactly the shape actor operations need since
    /// their critical section spans durable I/O.
    pub async fn lease_owned(&self, key: &str) -> tokio::sync::OwnedMutexGuard<Option<S>> {
        let arc = self.arc_for(key);
        arc.lock_owned().await
    }
}
