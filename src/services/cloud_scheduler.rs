use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::scheduler::{display_name, JobStore, SchedulerError, StoreBackend};
use crate::config::Settings;
use crate::types::models::{AnalysisJob, JobPatch, JobPayload, JobState, NewJob};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
    #[serde(default, skip_serializing)]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_target: Option<HttpTarget>,
    #[serde(default, skip_serializing)]
    schedule_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    last_attempt_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsResponse {
    #[serde(default)]
    jobs: Vec<JobResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn encode_payload(payload: &JobPayload) -> Result<String, SchedulerError> {
    let json = serde_json::to_vec(payload).map_err(|e| SchedulerError::Payload(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

fn decode_payload(body: &str) -> Result<JobPayload, SchedulerError> {
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| SchedulerError::Payload(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| SchedulerError::Payload(e.to_string()))
}

fn into_analysis_job(resource: JobResource) -> AnalysisJob {
    let id = resource
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let target = resource.http_target.unwrap_or_default();
    let (payload, payload_error) = match target.body.as_deref().map(decode_payload) {
        Some(Ok(payload)) => (payload, None),
        Some(Err(e)) => {
            tracing::warn!("Could not decode payload for job {}: {}", id, e);
            (JobPayload::default(), Some(e.to_string()))
        }
        None => (JobPayload::default(), Some("job has no request body".to_string())),
    };

    AnalysisJob {
        name: display_name(&id),
        description: resource.description.or_else(|| {
            Some(format!("Analysis job for {}", payload.network))
        }),
        network: payload.network,
        analysis_type: payload.analysis_type,
        schedule: resource.schedule.unwrap_or_default(),
        state: JobState::from_scheduler(resource.state.as_deref().unwrap_or("")),
        num_wallets: payload.num_wallets,
        days_back: payload.days_back,
        function_url: target.uri.unwrap_or_default(),
        last_execution: resource.last_attempt_time,
        next_execution: resource.schedule_time,
        execution_count: 0,
        success_count: 0,
        payload_error,
        id,
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Cloud Scheduler REST client.
pub struct CloudSchedulerStore {
    client: Client,
    base_url: String,
    parent: String,
    access_token: Option<String>,
    timeout: Duration,
}

impl CloudSchedulerStore {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        project: &str,
        region: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            parent: format!("projects/{}/locations/{}", project, region),
            access_token,
            timeout,
        }
    }

    pub fn from_settings(client: Client, settings: &Settings) -> Self {
        Self::new(
            client,
            settings.scheduler_api_url.clone(),
            &settings.google_cloud_project,
            &settings.google_cloud_region,
            settings.google_access_token.clone(),
            settings.api_timeout,
        )
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    fn jobs_url(&self) -> String {
        format!("{}/{}/jobs", self.base_url, self.parent)
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/{}", self.jobs_url(), id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let request = self.client.request(method, url).timeout(self.timeout);
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, job_id: Option<&str>) -> Result<Response, SchedulerError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match (status, job_id) {
            (StatusCode::NOT_FOUND, Some(id)) => Err(SchedulerError::NotFound(id.to_string())),
            (StatusCode::CONFLICT, Some(id)) => Err(SchedulerError::AlreadyExists(id.to_string())),
            _ => Err(SchedulerError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            }),
        }
    }

    async fn job_action(&self, id: &str, action: &str) -> Result<(), SchedulerError> {
        let url = format!("{}:{}", self.job_url(id), action);
        self.send(
            self.request(Method::POST, url).json(&serde_json::json!({})),
            Some(id),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for CloudSchedulerStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Live
    }

    async fn list(&self) -> Result<Vec<AnalysisJob>, SchedulerError> {
        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.request(Method::GET, self.jobs_url());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListJobsResponse = self.send(request, None).await?.json().await?;
            jobs.extend(page.jobs.into_iter().map(into_analysis_job));

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Listed {} jobs from {}", jobs.len(), self.parent);
        Ok(jobs)
    }

    async fn get(&self, id: &str) -> Result<Option<AnalysisJob>, SchedulerError> {
        let request = self.request(Method::GET, self.job_url(id));
        match self.send(request, Some(id)).await {
            Ok(response) => Ok(Some(into_analysis_job(response.json().await?))),
            Err(SchedulerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, job: &NewJob) -> Result<AnalysisJob, SchedulerError> {
        let resource = JobResource {
            name: format!("{}/jobs/{}", self.parent, job.id),
            description: Some(job.description.clone()),
            schedule: Some(job.schedule.clone()),
            time_zone: Some("UTC".to_string()),
            http_target: Some(HttpTarget {
                uri: Some(job.function_url.clone()),
                http_method: Some("POST".to_string()),
                headers: Some(BTreeMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )])),
                body: Some(encode_payload(&job.payload)?),
            }),
            ..JobResource::default()
        };

        let request = self.request(Method::POST, self.jobs_url()).json(&resource);
        let created: JobResource = self.send(request, Some(&job.id)).await?.json().await?;
        tracing::info!("Created job: {}", job.id);
        Ok(into_analysis_job(created))
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<AnalysisJob, SchedulerError> {
        let mut mask = Vec::new();
        let mut resource = JobResource::default();
        if let Some(schedule) = &patch.schedule {
            resource.schedule = Some(schedule.clone());
            mask.push("schedule");
        }
        if let Some(description) = &patch.description {
            resource.description = Some(description.clone());
            mask.push("description");
        }
        if let Some(payload) = &patch.payload {
            resource.http_target = Some(HttpTarget {
                body: Some(encode_payload(payload)?),
                ..HttpTarget::default()
            });
            mask.push("httpTarget.body");
        }

        if mask.is_empty() {
            return self
                .get(id)
                .await?
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()));
        }

        let request = self
            .request(Method::PATCH, self.job_url(id))
            .query(&[("updateMask", mask.join(","))])
            .json(&resource);
        let updated: JobResource = self.send(request, Some(id)).await?.json().await?;
        tracing::info!("Updated job {} ({})", id, mask.join(","));
        Ok(into_analysis_job(updated))
    }

    async fn pause(&self, id: &str) -> Result<(), SchedulerError> {
        self.job_action(id, "pause").await?;
        tracing::info!("Paused job: {}", id);
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), SchedulerError> {
        self.job_action(id, "resume").await?;
        tracing::info!("Resumed job: {}", id);
        Ok(())
    }

    async fn run(&self, id: &str) -> Result<(), SchedulerError> {
        self.job_action(id, "run").await?;
        tracing::info!("Triggered job: {}", id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SchedulerError> {
        self.send(self.request(Method::DELETE, self.job_url(id)), Some(id))
            .await?;
        tracing::info!("Deleted job: {}", id);
        Ok(())
    }
}
