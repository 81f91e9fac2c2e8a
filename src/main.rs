//! WeatherVault - weather batch ingestion, retention, and serving service

mod cache;
mod config;
mod db;
mod error;
mod ingest;
mod models;
mod retention;
mod retry;
mod routes;
mod state;
mod tasks;
mod upstream;

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::CacheGateway;
use crate::config::Config;
use crate::db::Database;
use crate::ingest::Ingestor;
use crate::retention::RetentionManager;
use crate::routes::{batches, health, weather};
use crate::state::AppState;
use crate::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_vault=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration is startup-fatal when incomplete
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Connect to database and bootstrap the schema
    let db = match Database::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "failed to connect to database");
            std::process::exit(1);
        }
    };
    db.migrate().await.context("schema bootstrap failed")?;

    // The cache is a side-cache: run uncached if redis is unreachable
    let cache = match CacheGateway::connect(&config.redis_url, config.cache_ttl).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "cache unavailable, serving uncached");
            None
        }
    };

    let db = Arc::new(db);
    let upstream = UpstreamClient::new(&config, cache.clone())?;
    let retention = RetentionManager::new(Arc::clone(&db));
    let ingestor = Ingestor::new(
        Arc::clone(&db),
        upstream,
        retention,
        config.insert_chunk_size,
    );

    // Spawn the ingestion scheduler with a stop signal checked between cycles
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest_interval = config.ingest_interval;
    tokio::spawn(async move {
        tasks::ingestion::ingestion_task(ingestor, ingest_interval, shutdown_rx).await;
    });

    let state = AppState::new(Arc::clone(&db), cache);

    // Build router
    let app = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/weather/data", get(weather::get_weather_data))
        .route("/weather/summarize", get(weather::summarize_weather))
        .route("/batches", get(batches::list_batches))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(
        "WeatherVault v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr
    );
    info!(
        "Upstream: {}, ingest interval: {}s, chunk size: {}",
        config.upstream_base_url,
        config.ingest_interval.as_secs(),
        config.insert_chunk_size
    );

    // Start server; ctrl-c stops the scheduler and drains the listener
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen address")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("server error")?;

    Ok(())
}
