// Library exports for the OIDC/OAuth2 provider core.
// This file exposes modules and the top-level wiring (`initialize_app_state`)
// for binary and embedding consumers alike.

pub mod actor;
pub mod app;
pub mod app_config;
pub mod audit;
pub mod authcode;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod introspection;
pub mod jwks;
pub mod jwtcodec;
pub mod kv;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod ratelimit;
pub mod refresh;
pub mod revocation;
pub mod revocation_store;
pub mod schema;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use db::{DatabaseConfig, DieselPool, RedisConfig, RedisPool};

// Re-export the protocol route builder
pub use handlers::protocol_routes;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Library initialization function for external consumers.
/// Wires every stateful-core actor/engine (§4) against the durable pool,
/// the shared KV store, and the configured signing key, and returns the
/// fully assembled `AppState`.
pub async fn initialize_app_state() -> Result<AppState, Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config = app_config::config();

    info!("Initializing database pool...");
    let db_config = db::DieselDatabaseConfig::default();
    let max_connections = db_config.max_connections;
    let diesel_pool = db::create_diesel_pool(db_config).await?;

    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        let migration_config = migrations::MigrationConfig::default();
        migrations::run_all_migrations(&diesel_pool, migration_config)
            .await
            .map_err(|e| format!("Migration failed: {}", e))?;
    }

    info!("Initializing Redis pool...");
    let redis_config = db::RedisConfig::from_env();
    let redis_pool = db::RedisPool::new(redis_config).await?;

    let kv: Arc<dyn kv::KvStore> = Arc::new(kv::RedisKv::new(redis_pool.clone()));
    let clients: Arc<dyn models::client::ClientLookup> =
        models::client::DieselClientLookup::new(diesel_pool.clone());
    let audit_sink: Arc<dyn audit::AuditSink> = audit::PostgresAuditSink::new(diesel_pool.clone());

    let rate_limit = Arc::new(ratelimit::RateLimitCounter::new(kv.clone()));
    let authcode_store = Arc::new(authcode::AuthCodeStore::new(
        kv.clone(),
        config.max_codes_per_user,
    ));
    let refresh_rotator = Arc::new(refresh::RefreshRotator::new(kv.clone(), audit_sink.clone()));
    let session_manager = Arc::new(session::SessionManager::new(kv.clone()));
    let revocation_store = Arc::new(revocation_store::RevocationStore::new(kv.clone()));

    let key_manager: Arc<dyn jwks::KeyManager> = Arc::new(jwks::StaticKeyManager::from_rsa_public_pem(
        &config.jwt.kid,
        &config.jwt.public_key_pem,
    )?);
    let jwks = Arc::new(jwks::JwksCache::new(
        kv.clone(),
        key_manager,
        Duration::from_secs(config.jwks_process_cache_ttl_s),
        Duration::from_secs(config.jwks_shared_cache_ttl_s),
    ));

    let introspection_engine = Arc::new(introspection::IntrospectionEngine {
        jwks: jwks.clone(),
        clients: clients.clone(),
        revocation_store: revocation_store.clone(),
        refresh_rotator: refresh_rotator.clone(),
        issuer: config.issuer_url.clone(),
        strict_introspection: config.strict_introspection,
        expected_audience: config.expected_audience.clone(),
        allow_none_alg: config.allow_none_alg,
    });

    let revocation_engine = Arc::new(revocation::RevocationEngine {
        jwks: jwks.clone(),
        clients: clients.clone(),
        revocation_store: revocation_store.clone(),
        refresh_rotator: refresh_rotator.clone(),
        issuer: config.issuer_url.clone(),
        allow_none_alg: config.allow_none_alg,
        access_token_expiry_s: config.token_expiry_s as i64,
    });

    Ok(AppState {
        config: Arc::new(config.clone()),
        diesel_pool,
        redis_pool,
        kv,
        clients,
        rate_limit,
        authcode_store,
        refresh_rotator,
        session_manager,
        revocation_store,
        jwks,
        introspection_engine,
        revocation_engine,
        audit: audit_sink,
        max_connections,
    })
}

/// Health check handler: reports PostgreSQL and Redis reachability, the two
/// durable collaborators every actor ultimately depends on.
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;
    use axum::Json;

    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();

    let postgres_health = match db::check_diesel_health(&state.diesel_pool).await {
        Ok(_) => serde_json::json!({
            "status": "healthy",
            "max_connections": state.max_connections,
            "error": null
        }),
        Err(e) => {
            overall_healthy = false;
            serde_json::json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            })
        }
    };

    let redis_health_result = state.redis_pool.health_check().await;
    if !redis_health_result.is_healthy {
        overall_healthy = false;
    }

    let response = serde_json::json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "oidc-provider-core",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
            "redis": serde_json::json!({
                "status": if redis_health_result.is_healthy { "healthy" } else { "unhealthy" },
                "latency_ms": redis_health_result.latency_ms,
                "error": redis_health_result.error
            })
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
