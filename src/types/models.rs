use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FALLBACK_WALLET_COUNT: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Base,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Ethereum, Network::Base];

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Base => "base",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Network::Ethereum => "Ethereum",
            Network::Base => "Base",
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Ethereum
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Buy,
    Sell,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 2] = [AnalysisType::Buy, AnalysisType::Sell];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Buy => "buy",
            AnalysisType::Sell => "sell",
        }
    }
}

impl Default for AnalysisType {
    fn default() -> Self {
        AnalysisType::Buy
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Enabled,
    Paused,
    Disabled,
}

impl JobState {
    /// Maps a scheduler state string onto the three states the dashboard knows about.
    /// Anything unrecognised (e.g. `UPDATE_FAILED`) is reported as disabled.
    pub fn from_scheduler(raw: &str) -> Self {
        match raw {
            "ENABLED" => JobState::Enabled,
            "PAUSED" => JobState::Paused,
            _ => JobState::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletSource {
    Live,
    Cache,
    Fallback,
}

/// Number of wallets a job analysis covers, plus where that number came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCount {
    pub value: u64,
    pub source: WalletSource,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalletCount {
    pub fn live(value: u64, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            value,
            source: WalletSource::Live,
            retrieved_at,
            error: None,
        }
    }

    pub fn fallback(reason: impl Into<String>, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            value: FALLBACK_WALLET_COUNT,
            source: WalletSource::Fallback,
            retrieved_at,
            error: Some(reason.into()),
        }
    }

    /// Cache hits count as live for callers.
    pub fn is_live(&self) -> bool {
        matches!(self.source, WalletSource::Live | WalletSource::Cache)
    }
}

/// JSON body posted to the analysis function, both by the scheduler and by direct runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default = "default_num_wallets")]
    pub num_wallets: u64,
    #[serde(default = "default_days_back")]
    pub days_back: f64,
}

impl Default for JobPayload {
    fn default() -> Self {
        Self {
            network: Network::default(),
            analysis_type: AnalysisType::default(),
            num_wallets: default_num_wallets(),
            days_back: default_days_back(),
        }
    }
}

fn default_num_wallets() -> u64 {
    100
}

fn default_days_back() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub name: String,
    pub network: Network,
    pub analysis_type: AnalysisType,
    pub schedule: String,
    pub state: JobState,
    pub description: Option<String>,
    pub num_wallets: u64,
    pub days_back: f64,
    pub function_url: String,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub success_count: u64,
    /// Set when the stored invocation body could not be read back; the payload fields then hold defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_error: Option<String>,
}

impl AnalysisJob {
    pub fn payload(&self) -> JobPayload {
        JobPayload {
            network: self.network,
            analysis_type: self.analysis_type,
            num_wallets: self.num_wallets,
            days_back: self.days_back,
        }
    }
}

/// Store-level description of a job to create. Display names are derived from the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: String,
    pub schedule: String,
    pub description: String,
    pub function_url: String,
    pub payload: JobPayload,
}

/// Partial update applied by the store; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub schedule: Option<String>,
    pub description: Option<String>,
    pub payload: Option<JobPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreateRequest {
    pub id: String,
    pub network: Network,
    pub analysis_type: AnalysisType,
    pub schedule: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub num_wallets: Option<u64>,
    #[serde(default = "default_days_back")]
    pub days_back: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobUpdateRequest {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub num_wallets: Option<u64>,
    #[serde(default)]
    pub days_back: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleUpdateRequest {
    pub schedule: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobExecutionRequest {
    #[serde(default)]
    pub num_wallets: Option<u64>,
    #[serde(default)]
    pub days_back: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub total_transactions: u64,
    #[serde(default)]
    pub unique_tokens: u64,
    #[serde(default)]
    pub total_eth_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: String,
    pub name: String,
    pub network: Network,
    pub analysis_type: AnalysisType,
    pub schedule: String,
    pub description: String,
    pub num_wallets: u64,
    pub days_back: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CronPreset {
    pub label: &'static str,
    pub schedule: &'static str,
}
