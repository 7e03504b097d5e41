use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::jobs::JobService;

/// Periodically restamps every job with the current wallet count until `shutdown` flips.
pub async fn start_wallet_refresh(
    jobs: Arc<JobService>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Starting wallet refresh loop every {}s", every.as_secs());
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; startup already resolved once
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                tracing::info!("Starting wallet refresh cycle...");
                jobs.resolver().invalidate();
                match jobs.refresh_all().await {
                    Ok(outcome) if !outcome.failed.is_empty() => {
                        tracing::warn!(
                            "Wallet refresh updated {} of {} jobs, {} failed",
                            outcome.updated,
                            outcome.checked,
                            outcome.failed.len()
                        );
                    }
                    Ok(outcome) => {
                        tracing::info!("Wallet refresh updated {} of {} jobs", outcome.updated, outcome.checked);
                    }
                    Err(e) => tracing::error!("Wallet refresh cycle failed: {}", e),
                }
                let purged = jobs.purge_expired_cache();
                if purged > 0 {
                    tracing::debug!("Purged {} expired cache entries", purged);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Wallet refresh loop stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use crate::services::cache::TtlCache;
    use crate::services::invoker::HttpAnalysisInvoker;
    use crate::services::scheduler::{InMemoryJobStore, JobStore};
    use crate::services::wallet::WalletCountResolver;
    use crate::test_support::spawn_wallet_api;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn loop_restamps_jobs_and_stops_on_shutdown() {
        let wallet_api = spawn_wallet_api(StatusCode::OK, r#"{"count": 777}"#, Duration::ZERO).await;
        let settings = test_settings();
        let client = reqwest::Client::new();
        let store = Arc::new(InMemoryJobStore::with_demo_jobs("http://function"));
        let resolver = Arc::new(WalletCountResolver::new(
            client.clone(),
            wallet_api.url.clone(),
            Duration::from_secs(2),
            None,
            settings.cache_ttls.wallet,
        ));
        let jobs = Arc::new(JobService::new(
            store.clone(),
            resolver,
            Arc::new(HttpAnalysisInvoker::new(client, Duration::from_secs(2))),
            Some(Arc::new(TtlCache::new())),
            &settings,
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(start_wallet_refresh(jobs, Duration::from_millis(50), rx));

        let mut stamped = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let all = store.list().await.unwrap();
            if all.iter().all(|job| job.num_wallets == 777) {
                stamped = true;
                break;
            }
        }
        assert!(stamped);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
