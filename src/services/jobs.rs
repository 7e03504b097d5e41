use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::cache::{disabled_stats, CacheDomain, CacheKey, CacheStats, TtlCache};
use super::cron::validate_cron;
use super::invoker::AnalysisInvoker;
use super::scheduler::{display_name, JobStore, SchedulerError, StoreBackend};
use super::wallet::WalletCountResolver;
use crate::config::{CacheTtls, Settings};
use crate::types::models::{
    AnalysisJob, AnalysisResult, AnalysisType, JobCreateRequest, JobExecutionRequest, JobPatch,
    JobPayload, JobState, JobTemplate, JobUpdateRequest, Network, NewJob, WalletCount,
};

const MAX_JOB_ID_LEN: usize = 500;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    Conflict(String),

    #[error(transparent)]
    Upstream(SchedulerError),
}

impl From<SchedulerError> for JobError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => JobError::NotFound(id),
            SchedulerError::AlreadyExists(id) => JobError::Conflict(id),
            other => JobError::Upstream(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub job: AnalysisJob,
    pub wallet: WalletCount,
    pub requested_wallets: Option<u64>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub job: AnalysisJob,
    pub wallet: WalletCount,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub job_id: String,
    pub wallet: WalletCount,
    pub days_back: f64,
    pub scheduler_triggered: bool,
    pub result: Option<AnalysisResult>,
    pub invoker_error: Option<String>,
    pub function_duration_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub wallet: WalletCount,
    pub checked: usize,
    pub updated: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub backend: String,
    pub project: String,
    pub region: String,
    pub function_url: String,
    pub total_jobs: usize,
    pub enabled_jobs: usize,
    pub paused_jobs: usize,
    pub disabled_jobs: usize,
    pub wallet: WalletCount,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn validate_job_id(id: &str) -> Result<(), JobError> {
    if id.is_empty() {
        return Err(JobError::Validation("Job id is required".to_string()));
    }
    if id.len() > MAX_JOB_ID_LEN {
        return Err(JobError::Validation(format!(
            "Job id must be at most {} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(JobError::Validation(format!(
            "Job id may only contain letters, numbers, hyphens and underscores: {:?}",
            id
        )));
    }
    Ok(())
}

fn validate_days_back(days_back: f64) -> Result<(), JobError> {
    if !days_back.is_finite() || days_back < 0.0 {
        return Err(JobError::Validation(format!(
            "days_back must be a non-negative number, got {}",
            days_back
        )));
    }
    Ok(())
}

fn cron(expression: &str) -> Result<String, JobError> {
    validate_cron(expression).map_err(JobError::Validation)
}

/// The job's invocation body. Jobs whose body could not be decoded are never rewritten,
/// since that would replace their network, direction and lookback with defaults.
fn stored_payload(job: &AnalysisJob) -> Result<JobPayload, JobError> {
    match &job.payload_error {
        Some(reason) => Err(JobError::Upstream(SchedulerError::Payload(format!(
            "job {}: {}",
            job.id, reason
        )))),
        None => Ok(job.payload()),
    }
}

/// Job operations with the wallet-count stamping policy applied: every mutating
/// operation overwrites `num_wallets` with a freshly resolved count and ignores
/// whatever the caller asked for.
pub struct JobService {
    store: Arc<dyn JobStore>,
    resolver: Arc<WalletCountResolver>,
    invoker: Arc<dyn AnalysisInvoker>,
    cache: Option<Arc<TtlCache>>,
    ttls: CacheTtls,
    function_url: String,
    project: String,
    region: String,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<WalletCountResolver>,
        invoker: Arc<dyn AnalysisInvoker>,
        cache: Option<Arc<TtlCache>>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            resolver,
            invoker,
            cache,
            ttls: settings.cache_ttls.clone(),
            function_url: settings.crypto_function_url.clone(),
            project: settings.google_cloud_project.clone(),
            region: settings.google_cloud_region.clone(),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        self.store.backend()
    }

    pub fn resolver(&self) -> &WalletCountResolver {
        &self.resolver
    }

    fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.cache.as_ref().and_then(|cache| cache.get(key))
    }

    fn remember<T: Serialize>(&self, key: CacheKey, value: &T, ttl: Duration) {
        if let Some(cache) = &self.cache {
            cache.set(key, value, ttl);
        }
    }

    fn invalidate_job_views(&self) {
        if let Some(cache) = &self.cache {
            cache.clear_domain(CacheDomain::Jobs);
            cache.clear_domain(CacheDomain::Status);
        }
    }

    pub fn clear_cache(&self, domain: Option<CacheDomain>) -> usize {
        match (&self.cache, domain) {
            (Some(cache), Some(domain)) => cache.clear_domain(domain),
            (Some(cache), None) => cache.clear_all(),
            (None, _) => 0,
        }
    }

    pub fn purge_expired_cache(&self) -> usize {
        self.cache.as_ref().map(|cache| cache.purge_expired()).unwrap_or(0)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .as_ref()
            .map(|cache| cache.stats())
            .unwrap_or_else(disabled_stats)
    }

    pub async fn list_jobs(&self) -> Result<Vec<AnalysisJob>, JobError> {
        if let Some(jobs) = self.cached::<Vec<AnalysisJob>>(&CacheKey::JOB_LIST) {
            return Ok(jobs);
        }
        let jobs = self.store.list().await?;
        self.remember(CacheKey::JOB_LIST, &jobs, self.ttls.jobs);
        Ok(jobs)
    }

    pub async fn get_job(&self, id: &str) -> Result<AnalysisJob, JobError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub async fn create(&self, request: JobCreateRequest) -> Result<CreateOutcome, JobError> {
        let started = Instant::now();
        validate_job_id(&request.id)?;
        let schedule = cron(&request.schedule)?;
        validate_days_back(request.days_back)?;

        tracing::info!(
            component = "job_scheduler",
            operation = "create",
            job_id = %request.id,
            network = %request.network,
            analysis_type = %request.analysis_type,
            requested_wallets = ?request.num_wallets,
            "Starting job creation"
        );

        let wallet = self.resolver.resolve().await;
        if let Some(requested) = request.num_wallets.filter(|n| *n != wallet.value) {
            tracing::info!(
                component = "job_scheduler",
                job_id = %request.id,
                requested,
                actual = wallet.value,
                "Overriding wallet count"
            );
        }

        let new_job = NewJob {
            description: request.description.unwrap_or_else(|| {
                format!("{} {} analysis", request.network, request.analysis_type)
            }),
            schedule,
            function_url: self.function_url.clone(),
            payload: JobPayload {
                network: request.network,
                analysis_type: request.analysis_type,
                num_wallets: wallet.value,
                days_back: request.days_back,
            },
            id: request.id,
        };

        let job = self.store.create(&new_job).await.map_err(|e| {
            tracing::error!(component = "job_scheduler", job_id = %new_job.id, error = %e, "Job creation failed");
            JobError::from(e)
        })?;
        self.invalidate_job_views();

        let duration_ms = elapsed_ms(started);
        tracing::info!(
            component = "job_scheduler",
            job_id = %job.id,
            wallet_count = wallet.value,
            duration_ms,
            "Job created successfully"
        );

        Ok(CreateOutcome {
            job,
            wallet,
            requested_wallets: request.num_wallets,
            duration_ms,
        })
    }

    pub async fn update(&self, id: &str, request: JobUpdateRequest) -> Result<UpdateOutcome, JobError> {
        let schedule = request.schedule.as_deref().map(cron).transpose()?;
        if let Some(days_back) = request.days_back {
            validate_days_back(days_back)?;
        }

        let existing = self.get_job(id).await?;
        let stored = stored_payload(&existing)?;
        let wallet = self.resolver.resolve().await;
        if let Some(requested) = request.num_wallets.filter(|n| *n != wallet.value) {
            tracing::info!(component = "job_scheduler", job_id = %id, requested, actual = wallet.value, "Overriding wallet count");
        }

        let patch = JobPatch {
            schedule,
            description: request.description,
            payload: Some(JobPayload {
                num_wallets: wallet.value,
                days_back: request.days_back.unwrap_or(stored.days_back),
                ..stored
            }),
        };
        let job = self.store.update(id, &patch).await?;
        self.invalidate_job_views();

        tracing::info!(
            component = "job_scheduler",
            operation = "update",
            job_id = %id,
            schedule = %job.schedule,
            wallet_count = wallet.value,
            "Job updated"
        );
        Ok(UpdateOutcome { job, wallet })
    }

    pub async fn update_schedule(&self, id: &str, schedule: &str) -> Result<UpdateOutcome, JobError> {
        self.update(
            id,
            JobUpdateRequest {
                schedule: Some(schedule.to_string()),
                ..JobUpdateRequest::default()
            },
        )
        .await
    }

    pub async fn pause(&self, id: &str) -> Result<(), JobError> {
        self.store.pause(id).await?;
        self.invalidate_job_views();
        tracing::info!(component = "job_scheduler", operation = "pause", job_id = %id, "Job paused");
        Ok(())
    }

    /// Writes the current wallet count to the stored job when it has drifted.
    async fn stamp_wallets(&self, job: &AnalysisJob, wallet: &WalletCount) -> Result<(), JobError> {
        let stored = stored_payload(job)?;
        if stored.num_wallets == wallet.value {
            return Ok(());
        }
        let patch = JobPatch {
            payload: Some(JobPayload {
                num_wallets: wallet.value,
                ..stored
            }),
            ..JobPatch::default()
        };
        self.store.update(&job.id, &patch).await?;
        tracing::info!(
            component = "job_scheduler",
            job_id = %job.id,
            previous = job.num_wallets,
            wallet_count = wallet.value,
            "Stamped wallet count"
        );
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<UpdateOutcome, JobError> {
        let existing = self.get_job(id).await?;
        let wallet = self.resolver.resolve().await;
        self.stamp_wallets(&existing, &wallet).await?;
        self.store.resume(id).await?;
        self.invalidate_job_views();

        tracing::info!(component = "job_scheduler", operation = "resume", job_id = %id, wallet_count = wallet.value, "Job resumed");
        let job = self.get_job(id).await?;
        Ok(UpdateOutcome { job, wallet })
    }

    /// Triggers the scheduler run and also calls the analysis function directly so the
    /// caller gets a result back. Only the scheduler trigger decides success.
    pub async fn run_now(
        &self,
        id: &str,
        overrides: Option<JobExecutionRequest>,
    ) -> Result<RunOutcome, JobError> {
        let started = Instant::now();
        let overrides = overrides.unwrap_or_default();
        if let Some(days_back) = overrides.days_back {
            validate_days_back(days_back)?;
        }

        let job = self.get_job(id).await?;
        let wallet = self.resolver.resolve().await;
        self.stamp_wallets(&job, &wallet).await?;

        self.store.run(id).await.map_err(|e| {
            tracing::error!(component = "job_scheduler", job_id = %id, error = %e, "Scheduler trigger failed");
            JobError::from(e)
        })?;
        self.invalidate_job_views();

        let payload = JobPayload {
            num_wallets: wallet.value,
            days_back: overrides.days_back.unwrap_or(job.days_back),
            ..job.payload()
        };
        let function_url = if job.function_url.is_empty() {
            self.function_url.as_str()
        } else {
            job.function_url.as_str()
        };

        let function_started = Instant::now();
        let (result, invoker_error) = match self.invoker.invoke(function_url, &payload).await {
            Ok(result) => {
                tracing::info!(
                    component = "job_scheduler",
                    job_id = %id,
                    transactions = result.total_transactions,
                    tokens = result.unique_tokens,
                    eth_value = result.total_eth_value,
                    "Direct function call completed"
                );
                (Some(result), None)
            }
            Err(e) => {
                tracing::warn!(component = "job_scheduler", job_id = %id, error = %e, "Direct function call failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(RunOutcome {
            job_id: id.to_string(),
            days_back: payload.days_back,
            wallet,
            scheduler_triggered: true,
            result,
            invoker_error,
            function_duration_ms: elapsed_ms(function_started),
            duration_ms: elapsed_ms(started),
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        self.store.delete(id).await?;
        self.invalidate_job_views();
        tracing::info!(component = "job_scheduler", operation = "delete", job_id = %id, "Job deleted");
        Ok(())
    }

    /// Rewrites every job whose stored wallet count differs from the current one.
    pub async fn refresh_all(&self) -> Result<RefreshOutcome, JobError> {
        let wallet = self.resolver.resolve().await;
        let jobs = self.store.list().await?;
        let checked = jobs.len();

        let mut failed = Vec::new();
        let mut stale = Vec::new();
        for job in &jobs {
            match stored_payload(job) {
                Ok(payload) if payload.num_wallets != wallet.value => stale.push((job.id.as_str(), payload)),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(component = "job_scheduler", job_id = %job.id, error = %e, "Skipping job with unreadable payload");
                    failed.push(job.id.clone());
                }
            }
        }

        let updates = stale.into_iter().map(|(job_id, payload)| {
            let patch = JobPatch {
                payload: Some(JobPayload {
                    num_wallets: wallet.value,
                    ..payload
                }),
                ..JobPatch::default()
            };
            async move { (job_id.to_string(), self.store.update(job_id, &patch).await) }
        });
        let results = futures::future::join_all(updates).await;

        let mut updated = 0;
        for (job_id, result) in results {
            match result {
                Ok(_) => updated += 1,
                Err(e) => {
                    tracing::error!(component = "job_scheduler", job_id = %job_id, error = %e, "Failed to refresh wallet count");
                    failed.push(job_id);
                }
            }
        }
        if updated > 0 {
            self.invalidate_job_views();
        }

        tracing::info!(
            component = "job_scheduler",
            operation = "refresh_all",
            checked,
            updated,
            failed = failed.len(),
            wallet_count = wallet.value,
            "Wallet counts refreshed"
        );
        Ok(RefreshOutcome {
            wallet,
            checked,
            updated,
            failed,
        })
    }

    pub async fn status(&self) -> Result<StatusReport, JobError> {
        if let Some(report) = self.cached::<StatusReport>(&CacheKey::STATUS) {
            return Ok(report);
        }

        let jobs = self.list_jobs().await?;
        let count = |state: JobState| jobs.iter().filter(|job| job.state == state).count();
        let report = StatusReport {
            backend: match self.store.backend() {
                StoreBackend::Live => "live".to_string(),
                StoreBackend::Memory => "memory".to_string(),
            },
            project: self.project.clone(),
            region: self.region.clone(),
            function_url: self.function_url.clone(),
            total_jobs: jobs.len(),
            enabled_jobs: count(JobState::Enabled),
            paused_jobs: count(JobState::Paused),
            disabled_jobs: count(JobState::Disabled),
            wallet: self.resolver.resolve().await,
        };
        if report.wallet.is_live() {
            self.remember(CacheKey::STATUS, &report, self.ttls.status);
        }
        Ok(report)
    }

    pub async fn templates(&self) -> Vec<JobTemplate> {
        if let Some(templates) = self.cached::<Vec<JobTemplate>>(&CacheKey::TEMPLATES) {
            return templates;
        }

        let wallet = self.resolver.resolve().await;
        let mut templates = Vec::new();
        for network in Network::ALL {
            for analysis_type in AnalysisType::ALL {
                let schedule = match analysis_type {
                    AnalysisType::Buy => "0 */4 * * *",
                    AnalysisType::Sell => "30 */6 * * *",
                };
                templates.push(JobTemplate {
                    id: format!("crypto-{}-analysis-{}", analysis_type, network),
                    name: format!(
                        "{} {} Analysis",
                        network.display_name(),
                        display_name(analysis_type.as_str())
                    ),
                    network,
                    analysis_type,
                    schedule: schedule.to_string(),
                    description: format!(
                        "Analyzes {} transactions on {}",
                        analysis_type,
                        network.display_name()
                    ),
                    num_wallets: wallet.value,
                    days_back: 1.0,
                });
            }
        }

        if wallet.is_live() {
            self.remember(CacheKey::TEMPLATES, &templates, self.ttls.templates);
        }
        templates
    }
}
