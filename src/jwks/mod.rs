//! JWKS cache: process memory -> shared KV -> authoritative Key Manager
//! (§9 "Global JWKS cache is process-wide state whose lifecycle is
//! `init -> (refresh | evict)* -> teardown`"). A kid miss after a shared-KV
//! miss triggers an authoritative refresh, which then populates both tiers.
//!
//! The Key Manager itself -- where private/public key material actually
//! lives -- is an out-of-scope collaborator (§1 Non-goals: "the system
//! consumes RS256/ES256 ... primitives from a standard library"); this
//! module only defines the trait boundary it talks to.
//!
//! Grounded on `turbomcp-auth/src/jwt/jwks.rs`'s `CachedJwks`/TTL struct,
//! restructured from a single HTTP-fetch tier into the spec's three tiers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::kv::{self, KvStore};

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("key manager error: {0}")]
    KeyManager(String),
    #[error("kv error: {0}")]
    Kv(#[from] kv::KvError),
    #[error("unsupported key type for alg {0:?}")]
    UnsupportedKeyType(Algorithm),
}

/// Public-only JWK entry (§3 Data Model: "`{ kid, kty=RSA|EC, n/e or x/y/crv,
/// use:\"sig\", alg }`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkEntry {
    pub kid: String,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
}

impl JwkEntry {
    fn algorithm(&self) -> Result<Algorithm, JwksError> {
        match self.alg.as_str() {
            "RS256" => Ok(Algorithm::RS256),
            "ES256" => Ok(Algorithm::ES256),
            _ => Err(JwksError::UnsupportedKeyType(Algorithm::RS256)),
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, JwksError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or(JwksError::UnsupportedKeyType(Algorithm::RS256))?;
                let e = self.e.as_deref().ok_or(JwksError::UnsupportedKeyType(Algorithm::RS256))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwksError::KeyManager(e.to_string()))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or(JwksError::UnsupportedKeyType(Algorithm::ES256))?;
                let y = self.y.as_deref().ok_or(JwksError::UnsupportedKeyType(Algorithm::ES256))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwksError::KeyManager(e.to_string()))
            }
            _ => Err(JwksError::UnsupportedKeyType(Algorithm::RS256)),
        }
    }
}

/// A key resolved to something `crate::jwtcodec` can verify against.
#[derive(Clone)]
pub struct ResolvedKey {
    pub jwk: JwkEntry,
    pub alg: Algorithm,
    pub decoding_key: Arc<DecodingKey>,
}

/// The authoritative key source. An implementation typically wraps a KMS,
/// vault, or local signing-key store; this crate only talks to the trait.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn fetch_key(&self, kid: &str) -> Result<Option<JwkEntry>, JwksError>;
    async fn all_public_keys(&self) -> Result<Vec<JwkEntry>, JwksError>;
}

/// A `KeyManager` backed by one statically configured keypair, for
/// deployments that haven't wired a real key management collaborator yet.
pub struct StaticKeyManager {
    pub entry: JwkEntry,
}

impl StaticKeyManager {
    /// Build from the RSA public key PEM configured at `jwt.public_key_pem`
    /// (§10.3), extracting the `n`/`e` JWK components so the key is
    /// publishable at `/.well-known/jwks.json` rather than opaque PEM.
    pub fn from_rsa_public_pem(kid: &str, public_key_pem: &str) -> Result<Self, JwksError> {
        use rsa::pkcs8::DecodePublicKey;
        use rsa::traits::PublicKeyParts;

        let public_key = rsa::RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| JwksError::KeyManager(e.to_string()))?;
        let n = crate::util::base64url_encode(&public_key.n().to_bytes_be());
        let e = crate::util::base64url_encode(&public_key.e().to_bytes_be());

        Ok(Self {
            entry: JwkEntry {
                kid: kid.to_string(),
                kty: "RSA".into(),
                use_: "sig".into(),
                alg: "RS256".into(),
                n: Some(n),
                e: Some(e),
                x: None,
                y: None,
                crv: None,
            },
        })
    }
}

#[async_trait]
impl KeyManager for StaticKeyManager {
    async fn fetch_key(&self, kid: &str) -> Result<Option<JwkEntry>, JwksError> {
        Ok((self.entry.kid == kid).then(|| self.entry.clone()))
    }

    async fn all_public_keys(&self) -> Result<Vec<JwkEntry>, JwksError> {
        Ok(vec![self.entry.clone()])
    }
}

struct ProcessEntry {
    key: ResolvedKey,
    cached_at: Instant,
}

/// Hierarchical cache: process memory (fast, short-lived) -> shared KV
/// (cross-process, still short-lived) -> `KeyManager` (authoritative,
/// slow). `process_ttl`/`shared_ttl` come from `jwks_process_cache_ttl_s`
/// / `jwks_shared_cache_ttl_s` (§6, defaults 300s/60s).
pub struct JwksCache {
    process: RwLock<HashMap<String, ProcessEntry>>,
    kv: Arc<dyn KvStore>,
    manager: Arc<dyn KeyManager>,
    process_ttl: Duration,
    shared_ttl: Duration,
}

fn shared_cache_key(kid: &str) -> String {
    format!("m:jwks:{kid}")
}

impl JwksCache {
    pub fn new(
        kv: Arc<dyn KvStore>,
        manager: Arc<dyn KeyManager>,
        process_ttl: Duration,
        shared_ttl: Duration,
    ) -> Self {
        Self {
            process: RwLock::new(HashMap::new()),
            kv,
            manager,
            process_ttl,
            shared_ttl,
        }
    }

    /// Resolve a `kid` to a verifying key, walking tiers in order and
    /// back-filling every faster tier on a hit.
    pub async fn resolve(&self, kid: &str) -> Result<Option<ResolvedKey>, JwksError> {
        if let Some(key) = self.process_lookup(kid).await {
            return Ok(Some(key));
        }

        if let Some(jwk) = kv::get_json::<JwkEntry, _>(&*self.kv, &shared_cache_key(kid)).await? {
            let resolved = self.materialize(jwk)?;
            self.populate_process(kid, resolved.clone()).await;
            return Ok(Some(resolved));
        }

        debug!(kid, "jwks cache miss in both tiers, consulting key manager");
        match self.manager.fetch_key(kid).await? {
            Some(jwk) => {
                let resolved = self.materialize(jwk.clone())?;
                kv::put_json(&*self.kv, &shared_cache_key(kid), &jwk, Some(self.shared_ttl.as_secs()))
                    .await?;
                self.populate_process(kid, resolved.clone()).await;
                Ok(Some(resolved))
            }
            None => Ok(None),
        }
    }

    /// All currently published public keys, for the `/.well-known/jwks.json`
    /// surface. Always goes straight to the authoritative manager -- this
    /// endpoint is not on the hot path a kid-resolution cache protects.
    pub async fn all_public_keys(&self) -> Result<Vec<JwkEntry>, JwksError> {
        self.manager.all_public_keys().await
    }

    fn materialize(&self, jwk: JwkEntry) -> Result<ResolvedKey, JwksError> {
        let alg = jwk.algorithm()?;
        let decoding_key = Arc::new(jwk.decoding_key()?);
        Ok(ResolvedKey { jwk, alg, decoding_key })
    }

    async fn process_lookup(&self, kid: &str) -> Option<ResolvedKey> {
        let guard = self.process.read().await;
        guard.get(kid).and_then(|entry| {
            (entry.cached_at.elapsed() < self.process_ttl).then(|| entry.key.clone())
        })
    }

    async fn populate_process(&self, kid: &str, key: ResolvedKey) {
        let mut guard = self.process.write().await;
        guard.insert(
            kid.to_string(),
            ProcessEntry { key, cached_at: Instant::now() },
        );
    }

    /// Evict a kid from the process tier, e.g. on an observed verification
    /// failure that might indicate stale cached material.
    pub async fn evict(&self, kid: &str) {
        self.process.write().await.remove(kid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn rsa_jwk() -> JwkEntry {
        JwkEntry {
            kid: "kid-1".into(),
            kty: "RSA".into(),
            use_: "sig".into(),
            alg: "RS256".into(),
            n: Some("uiTWHO4ARRCqVj9cWabEMkA7Ji2ygAz1Yr1TS-mTv75jZMcvutOvxrKCCKhBr5Ogsxi-eQ9NXT3BQ21jOs9G-VHbj3YRQC3CnoRnF91pVP5De5CbEeqsGkFdEoAdDzZ-dJ__bf5LlfMjJkPphP69jeMOYqsdh-bufmrE6ylJnrzAiFetFR4DbEoaSBOZQoqxfRrMQO3VonyE5QPXtaVBMcJTwpn81-DgJ-I48c_hf-5nagc8pwLUuRxEG3AGuYaIJJIvgsveP0akIpEQIwdvnPFIbdLgRO3WsfIzlF69DYNzfdNU5vNR0mJAuRywksuXJTeThzzWcn8BoeNGBwXWsw".into()),
            e: Some("AQAB".into()),
            x: None,
            y: None,
            crv: None,
        }
    }

    #[tokio::test]
    async fn falls_back_through_tiers_to_key_manager() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::default());
        let manager: Arc<dyn KeyManager> = Arc::new(StaticKeyManager { entry: rsa_jwk() });
        let cache = JwksCache::new(kv, manager, Duration::from_secs(300), Duration::from_secs(60));

        let first = cache.resolve("kid-1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().alg, Algorithm::RS256);
    }

    #[tokio::test]
    async fn unknown_kid_resolves_to_none() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::default());
        let manager: Arc<dyn KeyManager> = Arc::new(StaticKeyManager { entry: rsa_jwk() });
        let cache = JwksCache::new(kv, manager, Duration::from_secs(300), Duration::from_secs(60));

        let resolved = cache.resolve("does-not-exist").await.unwrap();
        assert!(resolved.is_none());
    }

    const TEST_RSA_PUBLIC: &str = include_str!("../../tests/fixtures/test_rsa_public.pem");

    #[test]
    fn static_key_manager_extracts_jwk_components_from_pem() {
        let manager = StaticKeyManager::from_rsa_public_pem("test-kid", TEST_RSA_PUBLIC).unwrap();
        assert_eq!(manager.entry.kid, "test-kid");
        assert_eq!(manager.entry.kty, "RSA");
        assert_eq!(manager.entry.n.as_deref(), Some(rsa_jwk().n.unwrap().as_str()));
        assert_eq!(manager.entry.e.as_deref(), Some("AQAB"));
    }
}
