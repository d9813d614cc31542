//! KV adapter: the shared-store collaborator named in spec §2 ("Shared-store
//! get/put/delete with TTL, JSON codec"). Every actor treats this as the
//! durable tier under its granular key scheme (`f:<id>`, `t:<token>`, `m:<meta>`).

pub mod memory_kv;
pub mod redis_kv;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

pub use memory_kv::InMemoryKv;
pub use redis_kv::RedisKv;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Shared-store get/put/delete with TTL and prefix scan.
///
/// Implementors MUST treat `delete` and `put` as idempotent -- the actor model
/// depends on retried writes being harmless. Object-safe so actors can hold
/// `Arc<dyn KvStore>` rather than being generic over a concrete backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl_s: Option<u64>) -> Result<(), KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
    async fn delete_many(&self, keys: &[String]) -> Result<(), KvError>;
    /// Keys beginning with `prefix`. Used only for table-like views (e.g.
    /// `list_user_sessions`) per the spec's Design Notes -- never on a hot path.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// JSON-codec convenience on top of any `KvStore`, including `&dyn KvStore`.
pub async fn get_json<T, K>(store: &K, key: &str) -> Result<Option<T>, KvError>
where
    T: DeserializeOwned,
    K: KvStore + ?Sized,
{
    match store.get_raw(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T, K>(
    store: &K,
    key: &str,
    value: &T,
    ttl_s: Option<u64>,
) -> Result<(), KvError>
where
    T: Serialize + Sync,
    K: KvStore + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.put_raw(key, bytes, ttl_s).await
}
