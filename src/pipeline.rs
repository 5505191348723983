//! End-to-end run: reconcile consumption, sync and load prices, merge, write.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{PipelineConfig, RemoteSource};
use crate::consumption::{
    discover_consumption_files, reconcile_consumption, ConsumptionError, FileStatus,
};
use crate::hour_key::{parse_instant, Period, TimeParseError};
use crate::merge::{merge_range, output_file_name, write_merged_file, MergeError};
use crate::prices::load_prices;
use crate::remote_sync::{sync_periods, SyncCounts, SyncError};
use crate::transport::{MirrorDirTransport, RemoteTransport, TransportError};

/// Requested output window `[start, end)` plus the strings it was given as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start_raw: String,
    pub end_raw: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn parse(start_raw: &str, end_raw: &str, tz: Tz) -> Result<Self, PipelineError> {
        Ok(Self {
            start_raw: start_raw.trim().to_string(),
            end_raw: end_raw.trim().to_string(),
            start: parse_instant(start_raw, tz)?,
            end: parse_instant(end_raw, tz)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("consumption: {0}")]
    Consumption(#[from] ConsumptionError),
    #[error("sync: {0}")]
    Sync(#[from] SyncError),
    #[error("merge: {0}")]
    Merge(#[from] MergeError),
    #[error("window: {0}")]
    Window(#[from] TimeParseError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub consumption_files_loaded: u64,
    pub consumption_files_skipped: u64,
    pub consumption_hours: u64,
    pub periods: Vec<Period>,
    pub sync: SyncCounts,
    pub price_files_loaded: u64,
    pub price_hours: u64,
    pub rows_written: u64,
    pub rows_missing_consumption: u64,
    pub rows_missing_price: u64,
    pub output_path: PathBuf,
}

pub fn transport_from_config(
    cfg: &PipelineConfig,
) -> Result<Box<dyn RemoteTransport>, PipelineError> {
    match &cfg.remote {
        RemoteSource::Mirror { root } => Ok(Box::new(MirrorDirTransport::new(root.clone()))),
        #[cfg(feature = "http-transport")]
        RemoteSource::Http { base_url } => Ok(Box::new(crate::transport::HttpTransport::new(
            base_url.clone(),
            cfg.http_timeout_ms,
        )?)),
        #[cfg(not(feature = "http-transport"))]
        RemoteSource::Http { base_url } => Err(TransportError::HttpClientBuild(format!(
            "built without http-transport; cannot reach {base_url}"
        ))
        .into()),
    }
}

/// Runs every stage in order. Each stage finishes before the next starts.
pub fn run_pipeline(
    cfg: &PipelineConfig,
    transport: &dyn RemoteTransport,
    window: &Window,
) -> Result<RunReport, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.start",
        window_start = %window.start.to_rfc3339(),
        window_end = %window.end.to_rfc3339()
    );

    let candidates = discover_consumption_files(&cfg.consumption_dir)?;
    let consumption = reconcile_consumption(&candidates, &cfg.consumption);

    let sync = sync_periods(&consumption.periods, &cfg.sync, transport)?;
    let prices = load_prices(&consumption.periods, &cfg.sync.local_dir, &cfg.price_filter);

    let rows = merge_range(&consumption.store, &prices.store, window.start, window.end)?;
    let (missing_consumption, missing_price) = rows.clone().fold((0u64, 0u64), |(c, p), row| {
        (
            c + u64::from(row.consumption.is_none()),
            p + u64::from(row.price.is_none()),
        )
    });

    let output_path = cfg
        .output_dir
        .join(output_file_name(&window.start_raw, &window.end_raw));
    let rows_written = write_merged_file(&output_path, rows)?;

    let consumption_files_loaded = consumption
        .files
        .iter()
        .filter(|file| file.status == FileStatus::Loaded)
        .count() as u64;
    let report = RunReport {
        window_start: window.start,
        window_end: window.end,
        consumption_files_loaded,
        consumption_files_skipped: consumption.files.len() as u64 - consumption_files_loaded,
        consumption_hours: consumption.store.len() as u64,
        periods: consumption.periods.iter().copied().collect(),
        sync: sync.counts(),
        price_files_loaded: prices
            .files
            .iter()
            .filter(|file| file.status == FileStatus::Loaded)
            .count() as u64,
        price_hours: prices.store.len() as u64,
        rows_written,
        rows_missing_consumption: missing_consumption,
        rows_missing_price: missing_price,
        output_path,
    };

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        rows_written = report.rows_written,
        rows_missing_consumption = report.rows_missing_consumption,
        rows_missing_price = report.rows_missing_price,
        output_path = %report.output_path.display()
    );
    Ok(report)
}
