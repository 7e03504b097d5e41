use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;

mod api;
mod config;
mod logging;
mod services;
mod types;

#[cfg(test)]
mod test_support;

use crate::api::routes::create_router;
use crate::api::state::AppState;
use crate::config::Settings;
use crate::services::cache::TtlCache;
use crate::services::cloud_scheduler::CloudSchedulerStore;
use crate::services::invoker::HttpAnalysisInvoker;
use crate::services::jobs::JobService;
use crate::services::refresher;
use crate::services::scheduler::{InMemoryJobStore, JobStore};
use crate::services::wallet::WalletCountResolver;

fn build_store(client: &reqwest::Client, settings: &Settings) -> Arc<dyn JobStore> {
    if settings.use_live_scheduler() {
        let store = CloudSchedulerStore::from_settings(client.clone(), settings);
        tracing::info!("Using Cloud Scheduler at {}", store.parent());
        Arc::new(store)
    } else {
        tracing::warn!("No scheduler credentials configured, using in-memory demo jobs");
        Arc::new(InMemoryJobStore::with_demo_jobs(&settings.crypto_function_url))
    }
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let settings = Arc::new(Settings::from_env().context("invalid configuration")?);
    logging::init(&settings);

    tracing::info!(
        "Starting {} v{} (project {}, region {})",
        settings.app_name,
        settings.app_version,
        settings.google_cloud_project,
        settings.google_cloud_region
    );

    let client = reqwest::Client::builder()
        .timeout(settings.api_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let cache = settings.cache_enabled.then(|| Arc::new(TtlCache::new()));
    if cache.is_none() {
        tracing::info!("Caching disabled");
    }

    let resolver = Arc::new(WalletCountResolver::new(
        client.clone(),
        settings.wallet_api_url.clone(),
        settings.wallet_api_timeout,
        cache.clone(),
        settings.cache_ttls.wallet,
    ));
    let invoker = Arc::new(HttpAnalysisInvoker::new(client.clone(), settings.api_timeout));
    let store = build_store(&client, &settings);
    let jobs = Arc::new(JobService::new(store, resolver.clone(), invoker, cache, &settings));

    let startup_count = resolver.resolve().await;
    tracing::info!("Wallet count at startup: {} ({:?})", startup_count.value, startup_count.source);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh_handle = settings.wallet_refresh_interval.map(|every| {
        tokio::spawn(refresher::start_wallet_refresh(jobs.clone(), every, shutdown_rx.clone()))
    });

    let app = create_router(AppState::new(settings.clone(), jobs));
    let addr = settings.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            tracing::error!("Wallet refresh task failed: {:?}", e);
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
