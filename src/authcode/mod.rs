//! Authorization Code Store actor (§4.3). Sharded by `code` itself -- "the
//! actor is single-writer per code shard" -- so two concurrent consume
//! attempts on the same code can never both observe `used=false`. The
//! per-user live-code count (DDoS bound) is a table-like view computed by
//! scanning a durable per-user index rather than a second actor (§9 Design
//! Notes).
//!
//! Grounded on `models/refresh_token.rs`'s hashed-opaque-token persistence
//! idiom and `NewX`/`X` struct split; PKCE compare uses the teacher's
//! declared-but-unused `subtle` dependency, now actually exercised.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::actor::ShardMap;
use crate::errors::{CoreError, InvalidGrantReason};
use crate::kv::{self, KvStore};
use crate::util::base64url_encode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub scope: String,
    pub expires_at: i64,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct StoreCodeRequest {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub scope: String,
    pub expires_at: i64,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsumeCodeRequest {
    pub code: String,
    pub client_id: String,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
}

fn canonical_key(code: &str) -> String {
    format!("t:authcode:{code}")
}

fn user_index_key(user_id: &str) -> String {
    format!("f:authcode:user:{user_id}")
}

pub struct AuthCodeStore {
    shards: ShardMap<CodeRecord>,
    kv: Arc<dyn KvStore>,
    max_codes_per_user: u32,
}

impl AuthCodeStore {
    pub fn new(kv: Arc<dyn KvStore>, max_codes_per_user: u32) -> Self {
        Self { shards: ShardMap::new(), kv, max_codes_per_user }
    }

    pub async fn store(&self, req: StoreCodeRequest) -> Result<i64, CoreError> {
        let now = crate::util::now_ms() / 1000;
        let live = self.count_live_codes(&req.user_id, now).await;
        if live >= self.max_codes_per_user as usize {
            return Err(CoreError::TooManyCodes);
        }

        let mut guard = self.shards.lease_owned(&req.code).await;
        let ttl = (req.expires_at - now).max(1) as u64;
        let record = CodeRecord {
            code: req.code.clone(),
            client_id: req.client_id,
            redirect_uri: req.redirect_uri,
            user_id: req.user_id.clone(),
            scope: req.scope,
            expires_at: req.expires_at,
            code_challenge: req.code_challenge,
            code_challenge_method: req.code_challenge_method,
            nonce: req.nonce,
            used: false,
        };

        kv::put_json(&*self.kv, &canonical_key(&req.code), &record, Some(ttl)).await?;
        self.append_to_user_index(&req.user_id, &req.code).await;
        *guard = Some(record);

        Ok(req.expires_at)
    }

    pub async fn consume(&self, req: ConsumeCodeRequest) -> Result<CodeRecord, CoreError> {
        let mut guard = self.shards.lease_owned(&req.code).await;
        if guard.is_none() {
            *guard = kv::get_json(&*self.kv, &canonical_key(&req.code)).await?;
        }

        let missing_or_used = guard.as_ref().map(|r| r.used).unwrap_or(true);
        if missing_or_used {
            return Err(CoreError::InvalidGrant(InvalidGrantReason::CodeNotFoundOrUsed));
        }
        let record = guard.as_ref().unwrap();

        if record.client_id != req.client_id {
            return Err(CoreError::InvalidGrant(InvalidGrantReason::ClientMismatch));
        }
        if let Some(ref provided) = req.redirect_uri {
            if provided != &record.redirect_uri {
                return Err(CoreError::InvalidGrant(InvalidGrantReason::RedirectUriMismatch));
            }
        }

        if let Some(ref challenge) = record.code_challenge {
            let verifier = req
                .code_verifier
                .as_deref()
                .ok_or(CoreError::InvalidGrant(InvalidGrantReason::PkceMismatch))?;
            if !pkce_matches(challenge, verifier) {
                // Cryptographic PKCE mismatch is treated as theft: mark used.
                let record = guard.as_mut().unwrap();
                record.used = true;
                let snapshot = record.clone();
                let _ = kv::put_json(&*self.kv, &canonical_key(&req.code), &snapshot, None).await;
                return Err(CoreError::InvalidGrant(InvalidGrantReason::PkceMismatch));
            }
        }

        let record = guard.as_mut().unwrap();
        record.used = true;
        let snapshot = record.clone();
        kv::put_json(&*self.kv, &canonical_key(&req.code), &snapshot, None).await?;

        Ok(snapshot)
    }

    async fn count_live_codes(&self, user_id: &str, now: i64) -> usize {
        let codes: Vec<String> = kv::get_json(&*self.kv, &user_index_key(user_id))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let mut live = 0;
        for code in codes {
            if let Ok(Some(record)) = kv::get_json::<CodeRecord, _>(&*self.kv, &canonical_key(&code)).await {
                if !record.used && record.expires_at > now {
                    live += 1;
                }
            }
        }
        live
    }

    async fn append_to_user_index(&self, user_id: &str, code: &str) {
        let mut codes: Vec<String> = kv::get_json(&*self.kv, &user_index_key(user_id))
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        codes.push(code.to_string());
        if codes.len() > 64 {
            codes.drain(0..codes.len() - 64);
        }
        let _ = kv::put_json(&*self.kv, &user_index_key(user_id), &codes, Some(86_400)).await;
    }
}

/// `BASE64URL(SHA-256(code_verifier))` compared byte-for-byte, constant time
/// (testable property 11 applies to every secret/PKCE comparison, §5).
fn pkce_matches(stored_challenge: &str, verifier: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let computed = base64url_encode(&hasher.finalize());
    let a = computed.as_bytes();
    let b = stored_challenge.as_bytes();
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn store() -> AuthCodeStore {
        AuthCodeStore::new(Arc::new(InMemoryKv::new()), 5)
    }

    fn req(code: &str) -> StoreCodeRequest {
        StoreCodeRequest {
            code: code.into(),
            client_id: "cli1".into(),
            redirect_uri: "https://x/cb".into(),
            user_id: "U1".into(),
            scope: "openid".into(),
            expires_at: crate::util::now_ms() / 1000 + 120,
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
        }
    }

    #[tokio::test]
    async fn s1_code_is_single_use() {
        let store = store();
        store.store(req("C1")).await.unwrap();

        let consumed = store
            .consume(ConsumeCodeRequest {
                code: "C1".into(),
                client_id: "cli1".into(),
                code_verifier: None,
                redirect_uri: None,
            })
            .await
            .unwrap();
        assert_eq!(consumed.user_id, "U1");

        let second = store
            .consume(ConsumeCodeRequest {
                code: "C1".into(),
                client_id: "cli1".into(),
                code_verifier: None,
                redirect_uri: None,
            })
            .await;
        assert!(matches!(
            second,
            Err(CoreError::InvalidGrant(InvalidGrantReason::CodeNotFoundOrUsed))
        ));
    }

    #[tokio::test]
    async fn client_id_binding_enforced() {
        let store = store();
        store.store(req("C1")).await.unwrap();
        let result = store
            .consume(ConsumeCodeRequest {
                code: "C1".into(),
                client_id: "other-client".into(),
                code_verifier: None,
                redirect_uri: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(CoreError::InvalidGrant(InvalidGrantReason::ClientMismatch))
        ));
    }

    #[tokio::test]
    async fn s2_pkce_correctness() {
        let store = store();
        let mut r = req("C2");
        r.code_challenge = Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into());
        r.code_challenge_method = Some("S256".into());
        store.store(r).await.unwrap();

        let wrong = store
            .consume(ConsumeCodeRequest {
                code: "C2".into(),
                client_id: "cli1".into(),
                code_verifier: Some("wrong".into()),
                redirect_uri: None,
            })
            .await;
        assert!(matches!(
            wrong,
            Err(CoreError::InvalidGrant(InvalidGrantReason::PkceMismatch))
        ));

        // Record is now marked used (treated as theft) -- even the correct
        // verifier fails on retry.
        let retry = store
            .consume(ConsumeCodeRequest {
                code: "C2".into(),
                client_id: "cli1".into(),
                code_verifier: Some("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into()),
                redirect_uri: None,
            })
            .await;
        assert!(matches!(
            retry,
            Err(CoreError::InvalidGrant(InvalidGrantReason::CodeNotFoundOrUsed))
        ));
    }

    #[tokio::test]
    async fn s2_pkce_correct_verifier_succeeds() {
        let store = store();
        let mut r = req("C3");
        r.code_challenge = Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into());
        r.code_challenge_method = Some("S256".into());
        store.store(r).await.unwrap();

        let ok = store
            .consume(ConsumeCodeRequest {
                code: "C3".into(),
                client_id: "cli1".into(),
                code_verifier: Some("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into()),
                redirect_uri: None,
            })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn too_many_codes_is_bounded() {
        let store = store();
        for i in 0..5 {
            store.store(req(&format!("C{i}"))).await.unwrap();
        }
        let result = store.store(req("C-overflow")).await;
        assert!(matches!(result, Err(CoreError::TooManyCodes)));
    }
}
