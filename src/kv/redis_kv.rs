//! Redis-backed `KvStore`, built on the connection-manager pool in
//! `crate::db::redis_pool` (retry-with-backoff, pool exhaustion fallback --
//! unchanged from the teacher's implementation).

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::db::RedisPool;

use super::{KvError, KvStore};

pub struct RedisKv {
    pool: RedisPool,
}

impl RedisKv {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let key = key.to_string();
        self.pool
            .execute(move |mut conn| async move {
                let v: Option<Vec<u8>> = conn.get(&key).await?;
                Ok((v, conn))
            })
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl_s: Option<u64>) -> Result<(), KvError> {
        let key = key.to_string();
        self.pool
            .execute(move |mut conn| async move {
                match ttl_s {
                    Some(ttl) if ttl > 0 => {
                        let _: () = conn.set_ex(&key, value, ttl).await?;
                    }
                    _ => {
                        let _: () = conn.set(&key, value).await?;
                    }
                }
                Ok(((), conn))
            })
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let key = key.to_string();
        self.pool
            .execute(move |mut conn| async move {
                let _: i64 = conn.del(&key).await?;
                Ok(((), conn))
            })
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), KvError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.pool
            .execute(move |mut conn| async move {
                let _: i64 = conn.del(&keys).await?;
                Ok(((), conn))
            })
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let pattern = format!("{prefix}*");
        self.pool
            .execute(move |mut conn| async move {
                let mut keys = Vec::new();
                let mut iter: redis::AsyncIter<String> =
                    conn.scan_match(&pattern).await?;
                while let Some(k) = futures_util::StreamExt::next(&mut iter).await {
                    keys.push(k);
                }
                drop(iter);
                Ok((keys, conn))
            })
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}
