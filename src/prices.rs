//! Loading of synchronized day-ahead price files into an hour-keyed store.

use std::collections::BTreeSet;
use std::path::Path;

use chrono_tz::Tz;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consumption::{FileReport, FileStatus};
use crate::hour_key::{parse_hour_key, HourKey, Period, TimeParseError};
use crate::remote_sync::local_path_for;
use crate::store::{ConflictPolicy, Insertion, TimeKeyedStore};

pub const PRICE_DELIMITER: u8 = b'\t';

pub const COLUMN_DATETIME: &str = "DateTime";
pub const COLUMN_AREA_CODE: &str = "AreaCode";
pub const COLUMN_RESOLUTION_CODE: &str = "ResolutionCode";
pub const COLUMN_CURRENCY: &str = "Currency";
pub const COLUMN_PRICE: &str = "Price";

/// Which rows of a price file belong to the merged series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFilter {
    pub area_code: String,
    pub currency: String,
    pub hourly_resolution: String,
}

impl Default for PriceFilter {
    fn default() -> Self {
        Self {
            // FI bidding zone.
            area_code: "10YFI-1--------U".to_string(),
            currency: "EUR".to_string(),
            hourly_resolution: "PT60M".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PriceLoadError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("price file {path} lacks columns {missing:?}")]
    MissingColumns {
        path: String,
        missing: Vec<&'static str>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RowError {
    MissingField(&'static str),
    Price(String),
    Time(TimeParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PriceColumns {
    datetime: usize,
    area_code: usize,
    resolution: usize,
    currency: usize,
    price: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceLoad {
    pub store: TimeKeyedStore,
    pub files: Vec<FileReport>,
}

/// Reads the local price file of every period into one store.
///
/// Missing or unparsable files are logged and skipped. Price timestamps
/// without an offset are taken as UTC.
pub fn load_prices(
    periods: &BTreeSet<Period>,
    local_dir: &Path,
    filter: &PriceFilter,
) -> PriceLoad {
    let mut store = TimeKeyedStore::with_policy(ConflictPolicy::MaxWins);
    let mut files = Vec::with_capacity(periods.len());

    for period in periods {
        let path = local_path_for(local_dir, *period);
        if !path.is_file() {
            warn!(
                component = "prices",
                event = "prices.file.missing",
                period = %period,
                path = %path.display()
            );
            files.push(FileReport::empty(&path, FileStatus::Missing));
            continue;
        }

        let report = match load_price_file(&path, filter, &mut store) {
            Ok(report) => {
                info!(
                    component = "prices",
                    event = "prices.file.loaded",
                    period = %period,
                    accepted_rows = report.accepted_rows,
                    filtered_rows = report.filtered_rows,
                    rejected_rows = report.rejected_rows
                );
                report
            }
            Err(err) => {
                warn!(
                    component = "prices",
                    event = "prices.file.failed",
                    period = %period,
                    path = %path.display(),
                    error = %err
                );
                FileReport::empty(&path, FileStatus::Failed(err.to_string()))
            }
        };
        files.push(report);
    }

    info!(
        component = "prices",
        event = "prices.load.finish",
        hours = store.len(),
        area_code = %filter.area_code,
        currency = %filter.currency
    );
    PriceLoad { store, files }
}

/// Folds the admissible rows of one tab-separated price file into `store`.
pub fn load_price_file(
    path: &Path,
    filter: &PriceFilter,
    store: &mut TimeKeyedStore,
) -> Result<FileReport, PriceLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(PRICE_DELIMITER)
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let columns = locate_columns(reader.headers()?, path)?;

    let mut report = FileReport::empty(path, FileStatus::Loaded);
    for (line_idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                report.rejected_rows += 1;
                debug!(
                    component = "prices",
                    event = "prices.row.rejected",
                    path = %path.display(),
                    row = line_idx + 2,
                    error = %err
                );
                continue;
            }
        };

        if !is_admissible(&record, &columns, filter) {
            report.filtered_rows += 1;
            continue;
        }

        match parse_row(&record, &columns) {
            Ok((key, price)) => {
                if store.put(key, price) != Insertion::Inserted {
                    report.duplicate_rows += 1;
                }
                report.accepted_rows += 1;
            }
            Err(err) => {
                report.rejected_rows += 1;
                debug!(
                    component = "prices",
                    event = "prices.row.rejected",
                    path = %path.display(),
                    row = line_idx + 2,
                    error = ?err
                );
            }
        }
    }
    Ok(report)
}

fn locate_columns(headers: &StringRecord, path: &Path) -> Result<PriceColumns, PriceLoadError> {
    let position = |column: &str| {
        headers
            .iter()
            .position(|name| name.trim().trim_start_matches('\u{feff}') == column)
    };

    match (
        position(COLUMN_DATETIME),
        position(COLUMN_AREA_CODE),
        position(COLUMN_RESOLUTION_CODE),
        position(COLUMN_CURRENCY),
        position(COLUMN_PRICE),
    ) {
        (Some(datetime), Some(area_code), Some(resolution), Some(currency), Some(price)) => {
            Ok(PriceColumns {
                datetime,
                area_code,
                resolution,
                currency,
                price,
            })
        }
        _ => Err(PriceLoadError::MissingColumns {
            path: path.display().to_string(),
            missing: [
                COLUMN_DATETIME,
                COLUMN_AREA_CODE,
                COLUMN_RESOLUTION_CODE,
                COLUMN_CURRENCY,
                COLUMN_PRICE,
            ]
            .into_iter()
            .filter(|column| position(*column).is_none())
            .collect(),
        }),
    }
}

fn is_admissible(record: &StringRecord, columns: &PriceColumns, filter: &PriceFilter) -> bool {
    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or_default();
    field(columns.area_code) == filter.area_code
        && field(columns.resolution) == filter.hourly_resolution
        && field(columns.currency) == filter.currency
}

fn parse_row(record: &StringRecord, columns: &PriceColumns) -> Result<(HourKey, f64), RowError> {
    let raw_time = record
        .get(columns.datetime)
        .ok_or(RowError::MissingField(COLUMN_DATETIME))?;
    let raw_price = record
        .get(columns.price)
        .ok_or(RowError::MissingField(COLUMN_PRICE))?;

    let price = raw_price
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| RowError::Price(raw_price.to_string()))?;
    let key = parse_hour_key(raw_time, Tz::UTC).map_err(RowError::Time)?;
    Ok((key, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "DateTime\tResolutionCode\tAreaCode\tAreaTypeCode\tAreaName\tMapCode\t\
                          Price\tCurrency\tUpdateTime";

    fn nov() -> Period {
        Period::new(2022, 11).unwrap()
    }

    fn row(datetime: &str, resolution: &str, area: &str, price: &str, currency: &str) -> String {
        format!(
            "{datetime}\t{resolution}\t{area}\tBZN\tBZN|FI\tFI\t{price}\t{currency}\t\
             2022-10-31 12:00:00\n"
        )
    }

    #[test]
    fn filters_area_currency_and_resolution() {
        let temp = tempdir().unwrap();
        let filter = PriceFilter::default();
        let body = [
            HEADER.to_string() + "\n",
            row("2022-11-01 00:00:00.000", "PT60M", &filter.area_code, "10.5", "EUR"),
            row("2022-11-01 01:00:00.000", "PT60M", "10YSE-1--------K", "99.0", "EUR"),
            row("2022-11-01 02:00:00.000", "PT60M", &filter.area_code, "11.0", "SEK"),
            row("2022-11-01 03:00:00.000", "PT15M", &filter.area_code, "12.0", "EUR"),
            row("2022-11-01 04:00:00.000", "PT60M", &filter.area_code, "-3.25", "EUR"),
            row("garbage", "PT60M", &filter.area_code, "1.0", "EUR"),
            row("2022-11-01 06:00:00.000", "PT60M", &filter.area_code, "n/a", "EUR"),
        ]
        .concat();
        fs::write(local_path_for(temp.path(), nov()), body).unwrap();

        let loaded = load_prices(&[nov()].into_iter().collect(), temp.path(), &filter);
        assert_eq!(loaded.store.len(), 2);
        assert_eq!(
            loaded.store.get(&HourKey::from_ymd_h(2022, 11, 1, 0).unwrap()),
            Some(10.5)
        );
        assert_eq!(
            loaded.store.get(&HourKey::from_ymd_h(2022, 11, 1, 4).unwrap()),
            Some(-3.25)
        );

        let report = &loaded.files[0];
        assert_eq!(report.status, FileStatus::Loaded);
        assert_eq!(report.accepted_rows, 2);
        assert_eq!(report.filtered_rows, 3);
        assert_eq!(report.rejected_rows, 2);
    }

    #[test]
    fn missing_and_malformed_files_are_skipped() {
        let temp = tempdir().unwrap();
        let dec = Period::new(2022, 12).unwrap();
        fs::write(local_path_for(temp.path(), dec), "foo\tbar\n1\t2\n").unwrap();

        let loaded = load_prices(
            &[nov(), dec].into_iter().collect(),
            temp.path(),
            &PriceFilter::default(),
        );
        assert!(loaded.store.is_empty());
        assert_eq!(loaded.files[0].status, FileStatus::Missing);
        assert!(matches!(loaded.files[1].status, FileStatus::Failed(_)));
    }

    #[test]
    fn missing_columns_are_named() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("x.csv");
        fs::write(&path, "DateTime\tAreaCode\tPrice\n").unwrap();

        let mut store = TimeKeyedStore::new();
        match load_price_file(&path, &PriceFilter::default(), &mut store).unwrap_err() {
            PriceLoadError::MissingColumns { missing, .. } => {
                assert_eq!(missing, vec![COLUMN_RESOLUTION_CODE, COLUMN_CURRENCY]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
