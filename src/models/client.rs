//! OAuth client registry (§10.5 ambient collaborator). Dynamic Client
//! Registration and admin CRUD are out of scope (§1) -- this is a read-only
//! lookup over rows provisioned out of band.
//!
//! Grounded on `models/refresh_token.rs`'s `NewX`/`X` Diesel struct split.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::db::DieselPool;
use crate::schema::oauth_clients;

/// Client secrets are stored as a salted SHA-256 hex digest; never compared
/// or logged in plaintext. Hashing itself need not be constant time (the
/// attacker doesn't control two near-equal plaintexts at this boundary); the
/// *comparison* of the resulting digests MUST be (§5).
pub fn hash_client_secret(secret: &str, tenant_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_salt.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    crate::util::base64url_encode(&hasher.finalize())
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = oauth_clients)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret_hash: String,
    pub tenant_id: uuid::Uuid,
    pub redirect_uris: serde_json::Value,
    pub allowed_scopes: serde_json::Value,
    pub is_confidential: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = oauth_clients)]
pub struct NewOAuthClient {
    pub client_id: String,
    pub client_secret_hash: String,
    pub tenant_id: uuid::Uuid,
    pub redirect_uris: serde_json::Value,
    pub allowed_scopes: serde_json::Value,
    pub is_confidential: bool,
}

impl OAuthClient {
    pub async fn find_by_id(
        conn: &mut diesel_async::AsyncPgConnection,
        id: &str,
    ) -> QueryResult<Option<Self>> {
        oauth_clients::table
            .filter(oauth_clients::client_id.eq(id))
            .select(OAuthClient::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Constant-time client-secret comparison (§5: "Constant-time equality
    /// MUST be used for every secret comparison"; testable property 11).
    /// Hashes the presented plaintext secret with the client's tenant as
    /// salt, then compares byte-for-byte in constant time against the stored
    /// digest -- wall-clock time never depends on the common-prefix length.
    pub fn secret_matches(&self, presented_secret: &str) -> bool {
        let presented_hash = hash_client_secret(presented_secret, &self.tenant_id.to_string());
        let stored = self.client_secret_hash.as_bytes();
        let presented = presented_hash.as_bytes();
        if stored.len() != presented.len() {
            return false;
        }
        stored.ct_eq(presented).into()
    }

    pub fn redirect_uris_vec(&self) -> Vec<String> {
        serde_json::from_value(self.redirect_uris.clone()).unwrap_or_default()
    }

    pub fn allowed_scopes_vec(&self) -> Vec<String> {
        serde_json::from_value(self.allowed_scopes.clone()).unwrap_or_default()
    }
}

/// The client-registry collaborator introspection, revocation, and the
/// token endpoint all authenticate clients against (§10.5). Object-safe so
/// it can be held as `Arc<dyn ClientLookup>`.
#[async_trait]
pub trait ClientLookup: Send + Sync {
    async fn find(&self, client_id: &str) -> Option<OAuthClient>;
}

pub struct DieselClientLookup {
    pool: DieselPool,
}

impl DieselClientLookup {
    pub fn new(pool: DieselPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ClientLookup for DieselClientLookup {
    async fn find(&self, client_id: &str) -> Option<OAuthClient> {
        let mut conn = self.pool.get().await.ok()?;
        OAuthClient::find_by_id(&mut conn, client_id).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_secret(secret: &str) -> OAuthClient {
        let tenant_id = uuid::Uuid::nil();
        OAuthClient {
            client_id: "cli1".into(),
            client_secret_hash: hash_client_secret(secret, &tenant_id.to_string()),
            tenant_id,
            redirect_uris: serde_json::json!([]),
            allowed_scopes: serde_json::json!([]),
            is_confidential: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn secret_matches_requires_equal_secret() {
        let client = client_with_secret("correct-horse-battery-staple");
        assert!(client.secret_matches("correct-horse-battery-staple"));
        assert!(!client.secret_matches("wrong-secret"));
    }
}
