//! elmerge core crate.
//!
//! Joins household hourly consumption exports with day-ahead market prices:
//! - consumption exports are reconciled into one value per hour
//! - monthly price files are mirrored from a remote file library, skipping
//!   files whose modification time has not changed
//! - both series are joined over a requested hourly window

mod config;
mod consumption;
mod hour_key;
mod merge;
mod observability;
mod pipeline;
mod prices;
mod remote_sync;
mod store;
mod transport;

pub use config::{
    pipeline_config_from_env, pipeline_config_from_lookup, ConfigError, PipelineConfig,
    RemoteSource,
};
pub use consumption::{
    discover_consumption_files, parse_decimal_comma, reconcile_consumption, ConsumptionColumns,
    ConsumptionConfig, ConsumptionError, ConsumptionReconciliation, ConsumptionSchema, FileReport,
    FileStatus, SchemaMatch,
};
pub use hour_key::{
    is_hour_aligned, parse_hour_key, parse_instant, HourKey, Period, TimeParseError,
};
pub use merge::{
    hours_in_window, merge_range, output_file_name, write_merged_csv, write_merged_file,
    MergeError, MergedRow, MergedRows, OUTPUT_HEADER,
};
pub use observability::{
    init_logging, log_app_start, log_config_resolved, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{run_pipeline, transport_from_config, PipelineError, RunReport, Window};
pub use prices::{load_price_file, load_prices, PriceFilter, PriceLoad, PriceLoadError};
pub use remote_sync::{
    local_mtime, local_path_for, remote_file_name, remote_path_for, set_local_mtime,
    sync_periods, sync_periods_with_policy, CacheEntry, ExactModifiedTime, FreshnessPolicy,
    PeriodSync, SyncConfig, SyncCounts, SyncDecision, SyncError, SyncReport, VersionMarker,
    DEFAULT_REMOTE_DIR,
};
pub use store::{ConflictPolicy, Insertion, TimeKeyedStore};
#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;
pub use transport::{parse_http_date, MirrorDirTransport, RemoteTransport, TransportError};
