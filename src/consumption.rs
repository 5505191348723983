//! Reconciliation of overlapping meter consumption exports.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hour_key::{parse_hour_key, HourKey, Period, TimeParseError};
use crate::store::{ConflictPolicy, Insertion, TimeKeyedStore};

pub const CONSUMPTION_DELIMITER: u8 = b';';

pub const COLUMN_START_TIME: &str = "Start Time";
pub const COLUMN_QUANTITY: &str = "Quantity";
pub const COLUMN_RESOLUTION: &str = "Resolution";
pub const COLUMN_UNIT: &str = "Unit Type";
pub const COLUMN_QUALITY: &str = "Quality";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionConfig {
    pub hourly_resolution: String,
    pub unit: String,
    pub quality: String,
    /// Applied to `Start Time` values that carry no UTC offset.
    pub timezone: Tz,
    pub policy: ConflictPolicy,
}

impl Default for ConsumptionConfig {
    fn default() -> Self {
        Self {
            hourly_resolution: "PT1H".to_string(),
            unit: "kWh".to_string(),
            quality: "OK".to_string(),
            timezone: Tz::Europe__Helsinki,
            policy: ConflictPolicy::MaxWins,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumptionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("file {path} has an empty header line")]
    EmptyHeader { path: PathBuf },
    #[error("consumption directory {path} is not readable: {source}")]
    Discovery {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RowError {
    MissingField(&'static str),
    Quantity(String),
    NegativeQuantity(String),
    Time(TimeParseError),
}

/// Positions of the consumption columns within a recognized header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionColumns {
    pub start_time: usize,
    pub quantity: usize,
    pub resolution: usize,
    pub unit: usize,
    pub quality: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMatch {
    Recognized(ConsumptionColumns),
    Unrecognized { missing: Vec<&'static str> },
}

pub struct ConsumptionSchema;

impl ConsumptionSchema {
    /// Classifies a raw header line of a `;`-delimited export.
    pub fn match_header_line(line: &str) -> SchemaMatch {
        Self::match_fields(line.trim_end_matches(['\r', '\n']).split(';'))
    }

    pub fn match_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> SchemaMatch {
        let names: Vec<String> = fields.into_iter().map(clean_header_field).collect();
        let position = |column: &str| names.iter().position(|name| name == column);

        let found = [
            (COLUMN_START_TIME, position(COLUMN_START_TIME)),
            (COLUMN_QUANTITY, position(COLUMN_QUANTITY)),
            (COLUMN_RESOLUTION, position(COLUMN_RESOLUTION)),
            (COLUMN_UNIT, position(COLUMN_UNIT)),
            (COLUMN_QUALITY, position(COLUMN_QUALITY)),
        ];

        match found {
            [
                (_, Some(start_time)),
                (_, Some(quantity)),
                (_, Some(resolution)),
                (_, Some(unit)),
                (_, Some(quality)),
            ] => SchemaMatch::Recognized(ConsumptionColumns {
                start_time,
                quantity,
                resolution,
                unit,
                quality,
            }),
            _ => SchemaMatch::Unrecognized {
                missing: found
                    .iter()
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(name, _)| *name)
                    .collect(),
            },
        }
    }
}

fn clean_header_field(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .trim_matches('"')
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Loaded,
    Unrecognized,
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub accepted_rows: u64,
    pub filtered_rows: u64,
    pub rejected_rows: u64,
    pub duplicate_rows: u64,
}

impl FileReport {
    pub(crate) fn empty(path: &Path, status: FileStatus) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            accepted_rows: 0,
            filtered_rows: 0,
            rejected_rows: 0,
            duplicate_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionReconciliation {
    pub store: TimeKeyedStore,
    pub periods: BTreeSet<Period>,
    pub files: Vec<FileReport>,
}

/// Lists regular `*.csv` files directly under `dir`, sorted by path.
pub fn discover_consumption_files(dir: &Path) -> Result<Vec<PathBuf>, ConsumptionError> {
    let entries = fs::read_dir(dir).map_err(|source| ConsumptionError::Discovery {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            out.push(path);
        }
    }
    out.sort();

    debug!(
        component = "consumption",
        event = "consumption.discover",
        dir = %dir.display(),
        candidate_count = out.len()
    );
    Ok(out)
}

/// Folds every admissible row of `candidates`, in order, into one store.
///
/// Unreadable or unrecognized files are logged and skipped; they never abort
/// the run.
pub fn reconcile_consumption(
    candidates: &[PathBuf],
    cfg: &ConsumptionConfig,
) -> ConsumptionReconciliation {
    let mut store = TimeKeyedStore::with_policy(cfg.policy);
    let mut periods = BTreeSet::new();
    let mut files = Vec::with_capacity(candidates.len());

    info!(
        component = "consumption",
        event = "consumption.reconcile.start",
        candidate_count = candidates.len(),
        policy = cfg.policy.as_str()
    );

    for path in candidates {
        let report = match fold_file(path, cfg, &mut store, &mut periods) {
            Ok(report) => report,
            Err(err) => FileReport::empty(path, FileStatus::Failed(err.to_string())),
        };

        match &report.status {
            FileStatus::Loaded => info!(
                component = "consumption",
                event = "consumption.file.accepted",
                path = %path.display(),
                accepted_rows = report.accepted_rows,
                filtered_rows = report.filtered_rows,
                rejected_rows = report.rejected_rows,
                duplicate_rows = report.duplicate_rows
            ),
            // Rows read before a mid-file failure stay folded.
            FileStatus::Failed(error) => warn!(
                component = "consumption",
                event = "consumption.file.failed",
                path = %path.display(),
                accepted_rows = report.accepted_rows,
                filtered_rows = report.filtered_rows,
                rejected_rows = report.rejected_rows,
                duplicate_rows = report.duplicate_rows,
                error = %error
            ),
            FileStatus::Unrecognized | FileStatus::Missing => {}
        }
        files.push(report);
    }

    let period_list: Vec<String> = periods.iter().map(Period::to_string).collect();
    info!(
        component = "consumption",
        event = "consumption.reconcile.finish",
        hours = store.len(),
        periods = ?period_list
    );

    ConsumptionReconciliation {
        store,
        periods,
        files,
    }
}

fn fold_file(
    path: &Path,
    cfg: &ConsumptionConfig,
    store: &mut TimeKeyedStore,
    periods: &mut BTreeSet<Period>,
) -> Result<FileReport, ConsumptionError> {
    let header = read_header_line(path)?;
    let columns = match ConsumptionSchema::match_header_line(&header) {
        SchemaMatch::Recognized(columns) => columns,
        SchemaMatch::Unrecognized { missing } => {
            warn!(
                component = "consumption",
                event = "consumption.file.unrecognized",
                path = %path.display(),
                missing_columns = ?missing
            );
            return Ok(FileReport::empty(path, FileStatus::Unrecognized));
        }
    };

    let file = fs::File::open(path)?;
    Ok(fold_records(path, file, &columns, cfg, store, periods))
}

/// Folds the data rows of one export. A read error ends the file early with
/// a `Failed` status that keeps the counts of the rows already folded.
fn fold_records<R: io::Read>(
    path: &Path,
    source: R,
    columns: &ConsumptionColumns,
    cfg: &ConsumptionConfig,
    store: &mut TimeKeyedStore,
    periods: &mut BTreeSet<Period>,
) -> FileReport {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(CONSUMPTION_DELIMITER)
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let mut report = FileReport::empty(path, FileStatus::Loaded);
    for (line_idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => {
                report.status = FileStatus::Failed(ConsumptionError::from(err).to_string());
                break;
            }
            Err(err) => {
                report.rejected_rows += 1;
                debug!(
                    component = "consumption",
                    event = "consumption.row.rejected",
                    path = %path.display(),
                    row = line_idx + 2,
                    error = %err
                );
                continue;
            }
        };

        if !is_admissible(&record, columns, cfg) {
            report.filtered_rows += 1;
            continue;
        }

        match parse_row(&record, columns, cfg.timezone) {
            Ok((key, quantity)) => {
                if store.put(key, quantity) != Insertion::Inserted {
                    report.duplicate_rows += 1;
                }
                periods.insert(key.period());
                report.accepted_rows += 1;
            }
            Err(err) => {
                report.rejected_rows += 1;
                debug!(
                    component = "consumption",
                    event = "consumption.row.rejected",
                    path = %path.display(),
                    row = line_idx + 2,
                    error = ?err
                );
            }
        }
    }

    report
}

fn read_header_line(path: &Path) -> Result<String, ConsumptionError> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Err(ConsumptionError::EmptyHeader {
            path: path.to_path_buf(),
        });
    }
    Ok(line)
}

fn is_admissible(
    record: &StringRecord,
    columns: &ConsumptionColumns,
    cfg: &ConsumptionConfig,
) -> bool {
    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or_default();
    field(columns.quality) == cfg.quality
        && field(columns.resolution) == cfg.hourly_resolution
        && field(columns.unit) == cfg.unit
}

fn parse_row(
    record: &StringRecord,
    columns: &ConsumptionColumns,
    tz: Tz,
) -> Result<(HourKey, f64), RowError> {
    let start = record
        .get(columns.start_time)
        .ok_or(RowError::MissingField(COLUMN_START_TIME))?;
    let raw_quantity = record
        .get(columns.quantity)
        .ok_or(RowError::MissingField(COLUMN_QUANTITY))?;

    let quantity = parse_decimal_comma(raw_quantity)
        .ok_or_else(|| RowError::Quantity(raw_quantity.to_string()))?;
    if quantity < 0.0 {
        return Err(RowError::NegativeQuantity(raw_quantity.to_string()));
    }
    let key = parse_hour_key(start, tz).map_err(RowError::Time)?;
    Ok((key, quantity))
}

/// Parses a number written with `,` as decimal separator, e.g. `1,234`.
pub fn parse_decimal_comma(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}
