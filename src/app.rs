// Application state shared across handlers.
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    audit::AuditSink,
    authcode::AuthCodeStore,
    db::DieselPool,
    introspection::IntrospectionEngine,
    jwks::JwksCache,
    kv::KvStore,
    models::client::ClientLookup,
    ratelimit::RateLimitCounter,
    refresh::RefreshRotator,
    revocation::RevocationEngine,
    revocation_store::RevocationStore,
    session::SessionManager,
    RedisPool,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub redis_pool: RedisPool,
    pub kv: Arc<dyn KvStore>,
    pub clients: Arc<dyn ClientLookup>,
    pub rate_limit: Arc<RateLimitCounter>,
    pub authcode_store: Arc<AuthCodeStore>,
    pub refresh_rotator: Arc<RefreshRotator>,
    pub session_manager: Arc<SessionManager>,
    pub revocation_store: Arc<RevocationStore>,
    pub jwks: Arc<JwksCache>,
    pub introspection_engine: Arc<IntrospectionEngine>,
    pub revocation_engine: Arc<RevocationEngine>,
    pub audit: Arc<dyn AuditSink>,
    pub max_connections: u32,
}
