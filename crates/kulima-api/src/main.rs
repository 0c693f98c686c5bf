mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use kulima_core::db::Database;
use kulima_core::qr::HmacQrSigner;
use kulima_core::SyncEngine;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kulima_api=info".parse()?)
                .add_directive("kulima_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting kulima-api with config: {:?}", config);

    let db = Database::open(&config.database_path).await?;
    let signer = HmacQrSigner::new(config.qr_signing_key.as_bytes())?;
    let engine = SyncEngine::new(Arc::new(db), Arc::new(signer), config.sync_settings());

    let state = AppState::new(config, Arc::new(engine));
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("kulima-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
