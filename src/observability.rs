//! Shared logging configuration and initialization.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{PipelineConfig, RemoteSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|key| env::var(key).ok())
}

fn logging_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = lookup("ELMERGE_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(parsed) = lookup("ELMERGE_LOG_FORMAT").and_then(|raw| parse_log_format(&raw)) {
        config.format = parsed;
    }

    if let Some(parsed) = lookup("ELMERGE_LOG_TARGET").and_then(|raw| parse_bool(&raw)) {
        config.include_target = parsed;
    }

    config
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// the run summary.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "elmerge",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_config_resolved(config: &PipelineConfig) {
    let (remote_kind, remote_location) = match &config.remote {
        RemoteSource::Http { base_url } => ("http", base_url.clone()),
        RemoteSource::Mirror { root } => ("mirror", root.display().to_string()),
    };
    info!(
        component = "elmerge",
        event = "config.resolved",
        consumption_dir = %config.consumption_dir.display(),
        price_dir = %config.sync.local_dir.display(),
        output_dir = %config.output_dir.display(),
        remote_kind,
        remote_location = %remote_location,
        remote_dir = %config.sync.remote_dir,
        area_code = %config.price_filter.area_code,
        currency = %config.price_filter.currency,
        timezone = config.timezone().name(),
        conflict_policy = config.consumption.policy.as_str()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> LoggingConfig {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        logging_config_from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_when_env_missing() {
        assert_eq!(config_with(&[]), LoggingConfig::default());
    }

    #[test]
    fn parses_json_and_level_and_target() {
        let cfg = config_with(&[
            ("ELMERGE_LOG_LEVEL", "debug"),
            ("ELMERGE_LOG_FORMAT", "json"),
            ("ELMERGE_LOG_TARGET", "false"),
        ]);

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn invalid_format_or_target_falls_back_to_defaults() {
        let cfg = config_with(&[
            ("ELMERGE_LOG_LEVEL", "trace"),
            ("ELMERGE_LOG_FORMAT", "yaml"),
            ("ELMERGE_LOG_TARGET", "maybe"),
        ]);

        assert_eq!(cfg.level, "trace");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }
}
