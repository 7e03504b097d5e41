use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_APP_NAME: &str = "Crypto Scheduler Dashboard";
const DEFAULT_PROJECT: &str = "crypto-tracker-cloudrun";
const DEFAULT_REGION: &str = "asia-southeast1";
const DEFAULT_SCHEDULER_API_URL: &str = "https://cloudscheduler.googleapis.com/v1";
const DEFAULT_FUNCTION_URL: &str = "https://crypto-analysis-function-qz6f5mkbmq-as.a.run.app";
const DEFAULT_WALLET_API_URL: &str = "http://localhost:8000";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    Live,
    Memory,
    Auto,
}

impl FromStr for SchedulerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(SchedulerBackend::Live),
            "memory" | "mock" => Ok(SchedulerBackend::Memory),
            "auto" => Ok(SchedulerBackend::Auto),
            other => Err(format!("expected live, memory or auto, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub wallet: Duration,
    pub jobs: Duration,
    pub status: Duration,
    pub templates: Duration,
}

/// Process-wide settings, built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub log_format: Option<String>,

    pub google_cloud_project: String,
    pub google_cloud_region: String,
    pub google_access_token: Option<String>,
    pub scheduler_api_url: String,
    pub scheduler_backend: SchedulerBackend,

    pub crypto_function_url: String,
    pub api_timeout: Duration,

    pub wallet_api_url: String,
    pub wallet_api_timeout: Duration,
    pub wallet_refresh_interval: Option<Duration>,

    pub cache_enabled: bool,
    pub cache_ttls: CacheTtls,

    pub admin_username: String,
    pub admin_password: Option<String>,
    pub secret_key: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let wallet_api_timeout = positive_secs(&get, "WALLET_API_TIMEOUT_SECS", 10)?;
        let api_timeout = positive_secs(&get, "API_TIMEOUT_SECS", 60)?;
        let refresh_secs: u64 = parse_or(&get, "WALLET_REFRESH_INTERVAL_SECS", 0)?;

        let settings = Settings {
            app_name: string_or("APP_NAME", DEFAULT_APP_NAME),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            host: string_or("HOST", "0.0.0.0"),
            port: parse_or(&get, "PORT", 8080)?,
            debug: parse_bool(&get, "DEBUG", false)?,
            log_format: get("LOG_FORMAT"),

            google_cloud_project: string_or("GOOGLE_CLOUD_PROJECT", DEFAULT_PROJECT),
            google_cloud_region: string_or("GOOGLE_CLOUD_REGION", DEFAULT_REGION),
            google_access_token: get("GOOGLE_ACCESS_TOKEN"),
            scheduler_api_url: trim_url(string_or("SCHEDULER_API_URL", DEFAULT_SCHEDULER_API_URL)),
            scheduler_backend: parse_or(&get, "SCHEDULER_BACKEND", SchedulerBackend::Auto)?,

            crypto_function_url: string_or("CRYPTO_FUNCTION_URL", DEFAULT_FUNCTION_URL),
            api_timeout,

            wallet_api_url: trim_url(string_or("WALLET_API_URL", DEFAULT_WALLET_API_URL)),
            wallet_api_timeout,
            wallet_refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),

            cache_enabled: parse_bool(&get, "CACHE_ENABLED", true)?,
            cache_ttls: CacheTtls {
                wallet: Duration::from_secs(parse_or(&get, "WALLET_CACHE_TTL_SECS", 300)?),
                jobs: Duration::from_secs(parse_or(&get, "JOBS_CACHE_TTL_SECS", 30)?),
                status: Duration::from_secs(parse_or(&get, "STATUS_CACHE_TTL_SECS", 60)?),
                templates: Duration::from_secs(parse_or(&get, "TEMPLATES_CACHE_TTL_SECS", 600)?),
            },

            admin_username: string_or("ADMIN_USERNAME", "admin"),
            admin_password: get("ADMIN_PASSWORD"),
            secret_key: string_or("SECRET_KEY", "change-me"),
        };

        // session tokens are derived from the key
        if settings.auth_enabled() && get("SECRET_KEY").is_none() {
            return Err(ConfigError::InvalidValue {
                key: "SECRET_KEY",
                value: String::new(),
                reason: "SECRET_KEY must be set when ADMIN_PASSWORD is set".to_string(),
            });
        }

        if settings.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PORT",
                value: "0".to_string(),
                reason: "port must be between 1 and 65535".to_string(),
            });
        }

        Ok(settings)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: "HOST",
                value: self.host.clone(),
                reason: e.to_string(),
            })
    }

    pub fn auth_enabled(&self) -> bool {
        self.admin_password.is_some()
    }

    /// Live scheduler access needs both a project and a token; `auto` falls back to memory without them.
    pub fn use_live_scheduler(&self) -> bool {
        match self.scheduler_backend {
            SchedulerBackend::Live => true,
            SchedulerBackend::Memory => false,
            SchedulerBackend::Auto => {
                self.google_access_token.is_some() && !self.google_cloud_project.is_empty()
            }
        }
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(default),
    }
}

fn positive_secs<G>(get: &G, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_string(),
            reason: "timeout must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings::from_lookup(|_| None).expect("defaults are valid")
}
