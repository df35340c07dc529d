mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use glimpse_common::config::Config;
use glimpse_core::docker::DockerRuntime;
use glimpse_core::submission::FsSubmissionStore;
use glimpse_core::{LanguageRegistry, Orchestrator, SandboxPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub pool: SandboxPool,
    pub metrics: metrics::Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Glimpse API booting...");

    let config = Config::from_env().context("Invalid configuration")?;
    let registry = LanguageRegistry::load_or_builtin(config.languages_file.as_deref())?;
    info!(
        languages = ?registry.specs().map(|s| s.id.id()).collect::<Vec<_>>(),
        "Loaded language registry"
    );

    let runtime = DockerRuntime::connect(config.sandbox.clone(), config.limits.max_output_bytes)?;
    info!(image = %runtime.image(), capacity = config.pool.capacity, "Starting sandbox pool");
    let pool = SandboxPool::new(Arc::new(runtime), config.pool.clone());
    pool.warm_up();

    let store = Arc::new(FsSubmissionStore::new(&config.workdir));
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(registry, store, config.limits.clone()),
        pool: pool.clone(),
        metrics: metrics::Metrics::new().context("Failed to register metrics")?,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown().await;
    info!("API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining sandbox pool");
}
