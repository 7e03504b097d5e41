use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::Settings;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
        }
    }
}

/// JSON in production, human-readable output when debugging, unless `LOG_FORMAT` says otherwise.
pub fn resolve_format(settings: &Settings) -> LogFormat {
    match settings
        .log_format
        .as_deref()
        .map(|value| value.to_ascii_lowercase())
    {
        Some(value) if value == "json" => LogFormat::Json,
        Some(value) if value == "pretty" => LogFormat::Pretty,
        Some(value) if value == "compact" => LogFormat::Compact,
        _ if settings.debug => LogFormat::Pretty,
        _ => LogFormat::Json,
    }
}

pub fn default_level(settings: &Settings) -> &'static str {
    if settings.debug {
        "debug"
    } else {
        "info"
    }
}

pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(settings)));
    let registry = Registry::default().with(filter);

    match resolve_format(settings) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}
