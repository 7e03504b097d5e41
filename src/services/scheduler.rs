use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::types::models::{
    AnalysisJob, AnalysisType, JobPatch, JobPayload, JobState, Network, NewJob,
};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Scheduler request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Scheduler API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid scheduler payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Live,
    Memory,
}

/// Job scheduling backend, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn list(&self) -> Result<Vec<AnalysisJob>, SchedulerError>;
    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, SchedulerError>;
    async fn create(&self, job: &NewJob) -> Result<AnalysisJob, SchedulerError>;
    async fn update(&self, id: &str, patch: &JobPatch) -> Result<AnalysisJob, SchedulerError>;
    async fn pause(&self, id: &str) -> Result<(), SchedulerError>;
    async fn resume(&self, id: &str) -> Result<(), SchedulerError>;
    async fn run(&self, id: &str) -> Result<(), SchedulerError>;
    async fn delete(&self, id: &str) -> Result<(), SchedulerError>;

    async fn update_schedule(&self, id: &str, schedule: &str) -> Result<AnalysisJob, SchedulerError> {
        let patch = JobPatch {
            schedule: Some(schedule.to_string()),
            ..JobPatch::default()
        };
        self.update(id, &patch).await
    }
}

/// "crypto-buy-analysis-ethereum" -> "Crypto Buy Analysis Ethereum"
pub fn display_name(job_id: &str) -> String {
    job_id
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Offline store used when no cloud credentials are configured, and in tests.
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<String, AnalysisJob>>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = AnalysisJob>) -> Self {
        let store = Self::new();
        {
            let mut map = store.jobs.write();
            for job in jobs {
                map.insert(job.id.clone(), job);
            }
        }
        store
    }

    /// The two demo jobs shown when running without a cloud project.
    pub fn with_demo_jobs(function_url: &str) -> Self {
        let demo = |id: &str,
                    analysis_type: AnalysisType,
                    schedule: &str,
                    state: JobState,
                    description: &str| AnalysisJob {
            id: id.to_string(),
            name: display_name(id),
            network: Network::Ethereum,
            analysis_type,
            schedule: schedule.to_string(),
            state,
            description: Some(description.to_string()),
            num_wallets: 100,
            days_back: 1.0,
            function_url: function_url.to_string(),
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            success_count: 0,
            payload_error: None,
        };
        Self::with_jobs([
            demo(
                "crypto-buy-analysis-ethereum",
                AnalysisType::Buy,
                "0 */4 * * *",
                JobState::Enabled,
                "Analyzes buy transactions on Ethereum",
            ),
            demo(
                "crypto-sell-analysis-ethereum",
                AnalysisType::Sell,
                "30 */6 * * *",
                JobState::Paused,
                "Analyzes sell transactions on Ethereum",
            ),
        ])
    }

    fn with_job<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut AnalysisJob) -> T,
    ) -> Result<T, SchedulerError> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        Ok(f(job))
    }
}

fn apply_payload(job: &mut AnalysisJob, payload: &JobPayload) {
    job.network = payload.network;
    job.analysis_type = payload.analysis_type;
    job.num_wallets = payload.num_wallets;
    job.days_back = payload.days_back;
    job.payload_error = None;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn list(&self) -> Result<Vec<AnalysisJob>, SchedulerError> {
        Ok(self.jobs.read().values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, SchedulerError> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn create(&self, new_job: &NewJob) -> Result<AnalysisJob, SchedulerError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&new_job.id) {
            return Err(SchedulerError::AlreadyExists(new_job.id.clone()));
        }
        let job = AnalysisJob {
            id: new_job.id.clone(),
            name: display_name(&new_job.id),
            network: new_job.payload.network,
            analysis_type: new_job.payload.analysis_type,
            schedule: new_job.schedule.clone(),
            state: JobState::Enabled,
            description: Some(new_job.description.clone()),
            num_wallets: new_job.payload.num_wallets,
            days_back: new_job.payload.days_back,
            function_url: new_job.function_url.clone(),
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            success_count: 0,
            payload_error: None,
        };
        jobs.insert(job.id.clone(), job.clone());
        tracing::info!("Mock: Created job {}", job.id);
        Ok(job)
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<AnalysisJob, SchedulerError> {
        self.with_job(id, |job| {
            if let Some(schedule) = &patch.schedule {
                job.schedule = schedule.clone();
            }
            if let Some(description) = &patch.description {
                job.description = Some(description.clone());
            }
            if let Some(payload) = &patch.payload {
                apply_payload(job, payload);
            }
            job.clone()
        })
    }

    async fn pause(&self, id: &str) -> Result<(), SchedulerError> {
        self.with_job(id, |job| job.state = JobState::Paused)?;
        tracing::info!("Mock: Paused job {}", id);
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), SchedulerError> {
        self.with_job(id, |job| job.state = JobState::Enabled)?;
        tracing::info!("Mock: Resumed job {}", id);
        Ok(())
    }

    async fn run(&self, id: &str) -> Result<(), SchedulerError> {
        self.with_job(id, |job| {
            job.last_execution = Some(Utc::now());
            job.execution_count += 1;
            job.success_count += 1;
        })?;
        tracing::info!("Mock: Running job {} now", id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SchedulerError> {
        self.jobs
            .write()
            .remove(id)
            .map(|_| tracing::info!("Mock: Deleted job {}", id))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }
}
