//! In-process `KvStore` used by this crate's own test suites so they don't
//! need a live Redis. Never wired into `AppState` outside `#[cfg(test)]`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KvError, KvStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct InMemoryKv {
    data: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut guard = self.data.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|t| Instant::now() >= t) => {
                guard.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl_s: Option<u64>) -> Result<(), KvError> {
        let expires_at = ttl_s
            .filter(|s| *s > 0)
            .map(|s| Instant::now() + Duration::from_secs(s));
        self.data
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.data.lock().await.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), KvError> {
        let mut guard = self.data.lock().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let guard = self.data.lock().await;
        Ok(guard
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
