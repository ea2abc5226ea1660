//! Smart Info Service
//!
//! Queue-driven CLIP encoding and on-demand weapon detection, dispatched to a
//! remote machine learning service. Serves a REST (Axum) API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use smartinfo::api::rest::{AppState, create_rest_router};
use smartinfo::config::Config;
use smartinfo::jobs::InMemoryJobQueue;
use smartinfo::locks::LockRegistry;
use smartinfo::ml::{MachineLearningClient, RequestBuilder};
use smartinfo::service::{SmartInfoDeps, SmartInfoService, SystemConfigStore};
use smartinfo::storage::SqliteStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let (config, config_source) = match Config::load(&config_path) {
        Ok(config) => (config, format!("Loaded config from {}", config_path)),
        Err(e) => (Config::default(), format!("Using default config ({})", e)),
    };

    // Initialize logging
    let level = config.log.level.parse::<Level>().unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!("Starting Smart Info Service v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", config_source);
    info!("Configuration loaded:");
    info!("  REST port: {}", config.server.rest_port);
    info!("  Machine learning: {} (enabled: {})", config.machine_learning.url, config.machine_learning.enabled);
    info!("  CLIP model: {}", config.machine_learning.clip.model_name);
    info!("  Staging dir: {}", config.machine_learning_client.staging_dir.display());
    info!("  Job workers: {}", config.jobs.concurrency);

    // Initialize storage
    let storage_path = config
        .storage
        .sqlite_path
        .to_str()
        .context("sqlite_path is not valid UTF-8")?;
    let storage = Arc::new(SqliteStorage::new(storage_path).await?);
    info!("SQLite storage initialized at: {}", storage_path);

    let machine_learning = Arc::new(MachineLearningClient::new(
        RequestBuilder::new(config.machine_learning_client.staging_dir.clone()),
        Duration::from_secs(config.machine_learning_client.request_timeout_secs),
    )?);
    let queue = Arc::new(InMemoryJobQueue::new(&config.jobs));
    let config_store = Arc::new(SystemConfigStore::new(config.machine_learning.clone()));

    let service = Arc::new(SmartInfoService::new(
        SmartInfoDeps {
            access: storage.clone(),
            assets: storage.clone(),
            jobs: queue.clone(),
            machine_learning,
            repository: storage.clone(),
            config: config_store,
            locks: Arc::new(LockRegistry::new()),
        },
        config.jobs.page_size,
    ));

    queue.start(service.clone());
    service.init().await.context("Failed to initialize smart search")?;

    let app_state = Arc::new(AppState {
        service: service.clone(),
        api_keys: config.auth.api_keys.clone(),
        start_time: Instant::now(),
    });
    let rest_router = create_rest_router(app_state);

    let addr = format!("0.0.0.0:{}", config.server.rest_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("REST API listening on http://{}", addr);
    info!("Smart Info Service is ready!");

    axum::serve(listener, rest_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, cleaning up...");
    queue.shutdown().await;

    info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
