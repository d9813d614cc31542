use axum::{middleware as axum_middleware, routing::get, Extension, Router};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oidc_provider_core::{health_check, initialize_app_state, protocol_routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("oidc-provider-core v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oidc_provider_core=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== STARTING OIDC PROVIDER CORE ===");

    let app_state = match initialize_app_state().await {
        Ok(state) => state,
        Err(e) => {
            error!("failed to initialize application state: {}", e);
            return Err(e);
        }
    };

    let bind_address = app_state.config.bind_address.clone();
    info!("Starting HTTP server on {}", bind_address);

    let app = Router::new()
        .route("/v1/health", get(health_check))
        .merge(protocol_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(
                    oidc_provider_core::middleware::cors::dynamic_cors_middleware,
                ))
                .layer(Extension(app_state.clone())),
        )
        .with_state(app_state);

    let addr: SocketAddr = bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
