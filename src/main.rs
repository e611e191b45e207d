//! Lottodesk - Lottery Settlement & Ledger Backend
//!
//! Settles numeric lottery bets against published draw results and pushes
//! the financial consequences (payouts, multi-tier commission) through the
//! account hierarchy, with every credit movement recorded in an
//! append-only ledger.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lottodesk_backend::api::create_router;
use lottodesk_backend::models::Config;
use lottodesk_backend::storage::Store;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("🎰 Lottodesk settlement engine starting");

    let store = Arc::new(Store::new(&config.database_path)?);

    let app = create_router(store).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lottodesk_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
