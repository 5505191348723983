//! Run configuration with defaults and environment overrides.

use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use thiserror::Error;

use crate::consumption::ConsumptionConfig;
use crate::prices::PriceFilter;
use crate::remote_sync::SyncConfig;
use crate::store::ConflictPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSource {
    /// Base URL of an HTTP(S) file library mirror.
    Http { base_url: String },
    /// Remote tree mounted as a local directory.
    Mirror { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub consumption_dir: PathBuf,
    pub output_dir: PathBuf,
    pub consumption: ConsumptionConfig,
    pub sync: SyncConfig,
    pub price_filter: PriceFilter,
    pub remote: RemoteSource,
    pub http_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            consumption_dir: PathBuf::from("data/consumption"),
            output_dir: PathBuf::from("output"),
            consumption: ConsumptionConfig::default(),
            sync: SyncConfig::default(),
            price_filter: PriceFilter::default(),
            remote: RemoteSource::Mirror {
                root: PathBuf::from("data/remote"),
            },
            http_timeout_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Timezone for window bounds and consumption timestamps without an offset.
    pub fn timezone(&self) -> Tz {
        self.consumption.timezone
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    pipeline_config_from_lookup(|key| env::var(key).ok())
}

/// Builds the config from a key lookup. Blank or unparsable values keep the
/// default, except the timezone which must name a known zone.
pub fn pipeline_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();
    let value = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(dir) = value("ELMERGE_CONSUMPTION_DIR") {
        config.consumption_dir = PathBuf::from(dir);
    }
    if let Some(dir) = value("ELMERGE_PRICE_DIR") {
        config.sync.local_dir = PathBuf::from(dir);
    }
    if let Some(dir) = value("ELMERGE_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(dir) = value("ELMERGE_REMOTE_DIR") {
        config.sync.remote_dir = dir;
    }

    if let Some(base_url) = value("ELMERGE_REMOTE_URL") {
        config.remote = RemoteSource::Http { base_url };
    } else if let Some(root) = value("ELMERGE_REMOTE_MIRROR") {
        config.remote = RemoteSource::Mirror {
            root: PathBuf::from(root),
        };
    }

    if let Some(area_code) = value("ELMERGE_AREA_CODE") {
        config.price_filter.area_code = area_code;
    }
    if let Some(currency) = value("ELMERGE_CURRENCY") {
        config.price_filter.currency = currency.to_ascii_uppercase();
    }
    if let Some(resolution) = value("ELMERGE_CONSUMPTION_RESOLUTION") {
        config.consumption.hourly_resolution = resolution;
    }

    if let Some(tz) = value("ELMERGE_TIMEZONE") {
        config.consumption.timezone = tz
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(tz.clone()))?;
    }
    if let Some(policy) =
        value("ELMERGE_CONFLICT_POLICY").and_then(|raw| ConflictPolicy::parse(&raw))
    {
        config.consumption.policy = policy;
    }
    if let Some(timeout) =
        value("ELMERGE_HTTP_TIMEOUT_MS").and_then(|raw| raw.parse::<u64>().ok())
    {
        config.http_timeout_ms = timeout;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = pipeline_config_from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.timezone(), Tz::Europe__Helsinki);
        assert_eq!(cfg.price_filter.area_code, "10YFI-1--------U");
        assert_eq!(cfg.consumption.hourly_resolution, "PT1H");
        assert_eq!(cfg.consumption.policy, ConflictPolicy::MaxWins);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = pipeline_config_from_lookup(lookup(&[
            ("ELMERGE_CONSUMPTION_DIR", "/srv/meter"),
            ("ELMERGE_PRICE_DIR", "/srv/prices"),
            ("ELMERGE_REMOTE_URL", "https://files.example.org"),
            ("ELMERGE_REMOTE_MIRROR", "/mnt/ignored"),
            ("ELMERGE_AREA_CODE", "10YSE-1--------K"),
            ("ELMERGE_CURRENCY", "sek"),
            ("ELMERGE_TIMEZONE", "Europe/Stockholm"),
            ("ELMERGE_CONFLICT_POLICY", "keep_last"),
            ("ELMERGE_HTTP_TIMEOUT_MS", "5000"),
        ]))
        .unwrap();

        assert_eq!(cfg.consumption_dir, PathBuf::from("/srv/meter"));
        assert_eq!(cfg.sync.local_dir, PathBuf::from("/srv/prices"));
        assert_eq!(
            cfg.remote,
            RemoteSource::Http {
                base_url: "https://files.example.org".to_string()
            }
        );
        assert_eq!(cfg.price_filter.area_code, "10YSE-1--------K");
        assert_eq!(cfg.price_filter.currency, "SEK");
        assert_eq!(cfg.timezone(), Tz::Europe__Stockholm);
        assert_eq!(cfg.consumption.policy, ConflictPolicy::KeepLast);
        assert_eq!(cfg.http_timeout_ms, 5_000);
    }

    #[test]
    fn invalid_optional_values_fall_back_and_bad_timezone_fails() {
        let cfg = pipeline_config_from_lookup(lookup(&[
            ("ELMERGE_CONFLICT_POLICY", "median"),
            ("ELMERGE_HTTP_TIMEOUT_MS", "soon"),
            ("ELMERGE_OUTPUT_DIR", "   "),
        ]))
        .unwrap();
        assert_eq!(cfg, PipelineConfig::default());

        let err = pipeline_config_from_lookup(lookup(&[("ELMERGE_TIMEZONE", "Mars/Olympus")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownTimezone("Mars/Olympus".to_string()));
    }
}
