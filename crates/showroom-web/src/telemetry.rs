use std::env;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FORMAT_ENV: &str = "SHOWROOM_LOG_FORMAT";

/// Console output style for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`) and
/// the fmt layer selected by `SHOWROOM_LOG_FORMAT`.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (format, format_warning) = parse_log_format(env::var(LOG_FORMAT_ENV).ok().as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("failed to install tracing subscriber")?;

    if let Some(message) = format_warning {
        warn!("{message}");
    }
    info!(service = service_name, format = format.as_str(), "telemetry configured");
    Ok(())
}

pub fn parse_log_format(raw: Option<&str>) -> (LogFormat, Option<String>) {
    let Some(value) = raw else {
        return (LogFormat::Compact, None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return (
            LogFormat::Compact,
            Some(format!("{LOG_FORMAT_ENV} is empty; defaulting to compact")),
        );
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "pretty" => (LogFormat::Pretty, None),
        "compact" => (LogFormat::Compact, None),
        "json" => (LogFormat::Json, None),
        _ => (
            LogFormat::Compact,
            Some(format!(
                "{LOG_FORMAT_ENV}='{trimmed}' is not one of pretty, compact or json; defaulting to compact"
            )),
        ),
    }
}
