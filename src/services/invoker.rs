use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::types::models::{AnalysisResult, JobPayload};

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("direct call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("function call failed: HTTP {status}")]
    Status { status: u16, body: String },
}

/// Calls the analysis function directly, outside the scheduler.
#[async_trait]
pub trait AnalysisInvoker: Send + Sync {
    async fn invoke(
        &self,
        function_url: &str,
        payload: &JobPayload,
    ) -> Result<AnalysisResult, InvokeError>;
}

pub struct HttpAnalysisInvoker {
    client: Client,
    timeout: Duration,
}

impl HttpAnalysisInvoker {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AnalysisInvoker for HttpAnalysisInvoker {
    async fn invoke(
        &self,
        function_url: &str,
        payload: &JobPayload,
    ) -> Result<AnalysisResult, InvokeError> {
        let response = self
            .client
            .post(function_url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<AnalysisResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_analysis_function;
    use crate::types::models::{AnalysisType, Network};
    use axum::http::StatusCode as AxumStatus;

    fn payload() -> JobPayload {
        JobPayload {
            network: Network::Ethereum,
            analysis_type: AnalysisType::Buy,
            num_wallets: 4821,
            days_back: 1.0,
        }
    }

    #[tokio::test]
    async fn successful_call_returns_summary() {
        let function = spawn_analysis_function(
            AxumStatus::OK,
            r#"{"total_transactions": 120, "unique_tokens": 14, "total_eth_value": 3.5}"#,
        )
        .await;
        let invoker = HttpAnalysisInvoker::new(Client::new(), Duration::from_secs(5));

        let result = invoker.invoke(&function.url, &payload()).await.unwrap();
        assert_eq!(result.total_transactions, 120);
        assert_eq!(result.unique_tokens, 14);
        assert_eq!(result.total_eth_value, 3.5);
        assert_eq!(function.hit_count(), 1);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let function = spawn_analysis_function(AxumStatus::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#).await;
        let invoker = HttpAnalysisInvoker::new(Client::new(), Duration::from_secs(5));

        match invoker.invoke(&function.url, &payload()).await {
            Err(InvokeError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
