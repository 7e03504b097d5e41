use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use super::cache::{CacheKey, TtlCache};
use super::clock::{Clock, SystemClock};
use crate::types::models::{WalletCount, WalletSource};

#[derive(Error, Debug)]
enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned HTTP {0}")]
    Status(u16),
    #[error("unrecognised response body: {0}")]
    Unparseable(String),
}

/// Which response shape the count was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountShape {
    CountField,
    SingleField,
    Number,
    DigitString,
    PlainText,
}

impl CountShape {
    fn as_str(self) -> &'static str {
        match self {
            CountShape::CountField => "object.count",
            CountShape::SingleField => "single-field object",
            CountShape::Number => "number",
            CountShape::DigitString => "digit string",
            CountShape::PlainText => "plain text",
        }
    }
}

/// Reads a wallet count out of whatever the wallet API returned. Shapes are tried in order:
/// `{"count": N}`, a single-field object, a bare number, a digit string, then the trimmed raw text.
pub fn normalize_wallet_count(body: &str) -> Option<(u64, CountShape)> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(found) = from_json(&value) {
            return Some(found);
        }
    }
    body.trim()
        .parse::<u64>()
        .ok()
        .map(|count| (count, CountShape::PlainText))
}

fn from_json(value: &Value) -> Option<(u64, CountShape)> {
    match value {
        Value::Object(map) => {
            if let Some(count) = map.get("count") {
                return coerce(count).map(|n| (n, CountShape::CountField));
            }
            if map.len() == 1 {
                return map
                    .values()
                    .next()
                    .and_then(coerce)
                    .map(|n| (n, CountShape::SingleField));
            }
            None
        }
        Value::Number(_) => coerce(value).map(|n| (n, CountShape::Number)),
        Value::String(_) => coerce(value).map(|n| (n, CountShape::DigitString)),
        _ => None,
    }
}

fn coerce(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f < u64::MAX as f64)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

pub struct WalletCountResolver {
    client: Client,
    api_url: String,
    timeout: Duration,
    cache: Option<Arc<TtlCache>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WalletCountResolver {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        timeout: Duration,
        cache: Option<Arc<TtlCache>>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            timeout,
            cache,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self) -> String {
        format!("{}/wallets/count", self.api_url.trim_end_matches('/'))
    }

    /// Never fails: cache hit, live value, or the fallback constant.
    pub async fn resolve(&self) -> WalletCount {
        if let Some(cache) = &self.cache {
            if let Some(mut cached) = cache.get::<WalletCount>(&CacheKey::WALLET_COUNT) {
                cached.source = WalletSource::Cache;
                tracing::debug!(component = "wallet_api", count = cached.value, "Serving wallet count from cache");
                return cached;
            }
        }

        let started = Instant::now();
        let outcome = self.fetch().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((value, shape)) => {
                let count = WalletCount::live(value, self.clock.now());
                tracing::info!(
                    component = "wallet_api",
                    api_url = %self.api_url,
                    count = value,
                    shape = shape.as_str(),
                    duration_ms,
                    "Wallet count fetch successful"
                );
                if let Some(cache) = &self.cache {
                    cache.set(CacheKey::WALLET_COUNT, &count, self.ttl);
                }
                count
            }
            Err(e) => {
                tracing::warn!(
                    component = "wallet_api",
                    api_url = %self.api_url,
                    error = %e,
                    duration_ms,
                    "Wallet count unavailable, using fallback"
                );
                WalletCount::fallback(e.to_string(), self.clock.now())
            }
        }
    }

    pub fn invalidate(&self) -> bool {
        self.cache
            .as_ref()
            .map(|cache| cache.delete(&CacheKey::WALLET_COUNT))
            .unwrap_or(false)
    }

    async fn fetch(&self) -> Result<(u64, CountShape), FetchError> {
        let response = self
            .client
            .get(self.endpoint())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            tracing::debug!(component = "wallet_api", status = status.as_u16(), body = %preview(&body), "Wallet API error response");
            return Err(FetchError::Status(status.as_u16()));
        }

        normalize_wallet_count(&body).ok_or_else(|| FetchError::Unparseable(preview(&body)))
    }
}
