//! Hour-by-hour outer join of the consumption and price stores.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::hour_key::{is_hour_aligned, HourKey};
use crate::store::TimeKeyedStore;

pub const OUTPUT_HEADER: [&str; 3] = ["DateTime", "Consumption (kWh)", "Price (€/MWh)"];

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("window start {0} is not aligned to an hour boundary")]
    UnalignedStart(DateTime<Utc>),
    #[error("window end {end} is before start {start}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One output hour. `None` marks a value absent from its store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub key: HourKey,
    pub consumption: Option<f64>,
    pub price: Option<f64>,
}

/// Lazy walk over `[start, end)` in one-hour steps. Cloning restarts from the
/// clone's current position.
#[derive(Debug, Clone)]
pub struct MergedRows<'a> {
    consumption: &'a TimeKeyedStore,
    price: &'a TimeKeyedStore,
    cursor: Option<HourKey>,
    remaining: usize,
}

impl Iterator for MergedRows<'_> {
    type Item = MergedRow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let key = self.cursor?;
        self.cursor = key.next_hour();
        self.remaining -= 1;

        Some(MergedRow {
            key,
            consumption: self.consumption.get(&key),
            price: self.price.get(&key),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for MergedRows<'_> {}

/// Number of hourly steps `t = start + k·1h` with `t < end`.
pub fn hours_in_window(start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    if end <= start {
        return 0;
    }
    let whole = (end - start).num_hours();
    let covered = start + TimeDelta::hours(whole);
    let count = if covered < end { whole + 1 } else { whole };
    usize::try_from(count).unwrap_or(usize::MAX)
}

/// Joins both stores over `[start, end)`.
///
/// `start` must already be on an hour boundary; no rounding is done.
pub fn merge_range<'a>(
    consumption: &'a TimeKeyedStore,
    price: &'a TimeKeyedStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<MergedRows<'a>, MergeError> {
    if !is_hour_aligned(&start) {
        return Err(MergeError::UnalignedStart(start));
    }
    if end < start {
        return Err(MergeError::InvertedWindow { start, end });
    }
    let cursor = HourKey::try_from_utc(start).map_err(|_| MergeError::UnalignedStart(start))?;

    Ok(MergedRows {
        consumption,
        price,
        cursor: Some(cursor),
        remaining: hours_in_window(start, end),
    })
}

/// Writes the header and one line per row; missing values become empty cells.
pub fn write_merged_csv<W: io::Write>(
    rows: impl IntoIterator<Item = MergedRow>,
    writer: W,
) -> Result<u64, MergeError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(OUTPUT_HEADER)?;

    let mut written = 0u64;
    for row in rows {
        out.write_record([
            row.key.to_rfc3339(),
            format_cell(row.consumption),
            format_cell(row.price),
        ])?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

/// Writes the merged rows to `path`, replacing it atomically.
pub fn write_merged_file(
    path: &Path,
    rows: impl IntoIterator<Item = MergedRow>,
) -> Result<u64, MergeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    let written = {
        let file = fs::File::create(&tmp_path)?;
        let written = write_merged_csv(rows, io::BufWriter::new(&file))?;
        file.sync_all()?;
        written
    };
    fs::rename(&tmp_path, path)?;

    info!(
        component = "merge",
        event = "merge.file.written",
        path = %path.display(),
        rows = written
    );
    Ok(written)
}

/// Output file name embedding the raw window bounds, with `+` spelled `p`.
pub fn output_file_name(start_raw: &str, end_raw: &str) -> String {
    format!(
        "consumption_price_{}_{}.csv",
        start_raw.trim().replace('+', "p"),
        end_raw.trim().replace('+', "p")
    )
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
