//! Incremental download of monthly day-ahead price files.
//!
//! A period's local copy is considered fresh when its version marker matches
//! the remote one. With [`ExactModifiedTime`] that is exact equality of the
//! modification times; after every fetch the local mtime is set to the
//! remote value so the next run can skip the transfer.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hour_key::Period;
use crate::transport::RemoteTransport;

pub const DEFAULT_REMOTE_DIR: &str = "/TP_export/DayAheadPrices_12.1.D";
const REMOTE_FILE_SUFFIX: &str = "DayAheadPrices_12.1.D.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub local_dir: PathBuf,
    pub remote_dir: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("data/prices"),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot prepare local price directory {path}: {source}")]
    LocalDir { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionMarker {
    ModifiedAt(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub resource_id: String,
    pub version: VersionMarker,
}

/// Decides whether a local copy can stand in for the remote resource.
pub trait FreshnessPolicy {
    fn name(&self) -> &'static str;

    fn is_fresh(&self, local: Option<&CacheEntry>, remote: &CacheEntry) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExactModifiedTime;

impl FreshnessPolicy for ExactModifiedTime {
    fn name(&self) -> &'static str {
        "exact_mtime"
    }

    fn is_fresh(&self, local: Option<&CacheEntry>, remote: &CacheEntry) -> bool {
        local
            .map(|entry| entry.resource_id == remote.resource_id && entry.version == remote.version)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDecision {
    UpToDate,
    Fetched { mtime_preserved: bool },
    FetchFailed,
    RemoteUnavailable,
}

impl SyncDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up_to_date",
            Self::Fetched { .. } => "fetched",
            Self::FetchFailed => "fetch_failed",
            Self::RemoteUnavailable => "remote_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSync {
    pub period: Period,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub decision: SyncDecision,
    pub remote_mtime: Option<i64>,
    pub bytes: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub up_to_date: u64,
    pub fetched: u64,
    pub fetch_failed: u64,
    pub remote_unavailable: u64,
    pub mtime_not_preserved: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcomes: Vec<PeriodSync>,
}

impl SyncReport {
    pub fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for outcome in &self.outcomes {
            match outcome.decision {
                SyncDecision::UpToDate => counts.up_to_date += 1,
                SyncDecision::Fetched { mtime_preserved } => {
                    counts.fetched += 1;
                    if !mtime_preserved {
                        counts.mtime_not_preserved += 1;
                    }
                }
                SyncDecision::FetchFailed => counts.fetch_failed += 1,
                SyncDecision::RemoteUnavailable => counts.remote_unavailable += 1,
            }
        }
        counts
    }

    pub fn outcome(&self, period: Period) -> Option<&PeriodSync> {
        self.outcomes.iter().find(|outcome| outcome.period == period)
    }
}

pub fn remote_file_name(period: Period) -> String {
    format!("{:04}_{:02}_{REMOTE_FILE_SUFFIX}", period.year, period.month)
}

pub fn remote_path_for(remote_dir: &str, period: Period) -> String {
    format!(
        "{}/{}",
        remote_dir.trim_end_matches('/'),
        remote_file_name(period)
    )
}

pub fn local_path_for(local_dir: &Path, period: Period) -> PathBuf {
    local_dir.join(remote_file_name(period))
}

pub fn sync_periods(
    periods: &BTreeSet<Period>,
    cfg: &SyncConfig,
    transport: &dyn RemoteTransport,
) -> Result<SyncReport, SyncError> {
    sync_periods_with_policy(periods, cfg, transport, &ExactModifiedTime)
}

/// Brings the local copy of every period's price file up to date, one period
/// at a time. Per-period failures are recorded and never stop the loop.
pub fn sync_periods_with_policy(
    periods: &BTreeSet<Period>,
    cfg: &SyncConfig,
    transport: &dyn RemoteTransport,
    policy: &dyn FreshnessPolicy,
) -> Result<SyncReport, SyncError> {
    fs::create_dir_all(&cfg.local_dir).map_err(|source| SyncError::LocalDir {
        path: cfg.local_dir.clone(),
        source,
    })?;

    info!(
        component = "remote_sync",
        event = "sync.start",
        period_count = periods.len(),
        remote_dir = %cfg.remote_dir,
        local_dir = %cfg.local_dir.display(),
        policy = policy.name()
    );

    let mut report = SyncReport::default();
    for period in periods {
        report
            .outcomes
            .push(sync_one(*period, cfg, transport, policy));
    }

    let counts = report.counts();
    info!(
        component = "remote_sync",
        event = "sync.finish",
        up_to_date = counts.up_to_date,
        fetched = counts.fetched,
        fetch_failed = counts.fetch_failed,
        remote_unavailable = counts.remote_unavailable,
        mtime_not_preserved = counts.mtime_not_preserved
    );
    Ok(report)
}

fn sync_one(
    period: Period,
    cfg: &SyncConfig,
    transport: &dyn RemoteTransport,
    policy: &dyn FreshnessPolicy,
) -> PeriodSync {
    let name = remote_file_name(period);
    let remote_path = remote_path_for(&cfg.remote_dir, period);
    let local_path = local_path_for(&cfg.local_dir, period);
    let mut outcome = PeriodSync {
        period,
        remote_path: remote_path.clone(),
        local_path: local_path.clone(),
        decision: SyncDecision::RemoteUnavailable,
        remote_mtime: None,
        bytes: None,
        error: None,
    };

    let remote_mtime = match transport.stat(&remote_path) {
        Ok(mtime) => mtime,
        Err(err) => {
            warn!(
                component = "remote_sync",
                event = "sync.period.remote_unavailable",
                period = %period,
                remote_path = %remote_path,
                error = %err
            );
            outcome.error = Some(err.to_string());
            return outcome;
        }
    };
    outcome.remote_mtime = Some(remote_mtime);

    let remote_entry = CacheEntry {
        resource_id: name.clone(),
        version: VersionMarker::ModifiedAt(remote_mtime),
    };
    let local_entry = local_mtime(&local_path).map(|mtime| CacheEntry {
        resource_id: name,
        version: VersionMarker::ModifiedAt(mtime),
    });

    if policy.is_fresh(local_entry.as_ref(), &remote_entry) {
        debug!(
            component = "remote_sync",
            event = "sync.period.up_to_date",
            period = %period,
            remote_mtime
        );
        outcome.decision = SyncDecision::UpToDate;
        return outcome;
    }

    let bytes = match fetch_atomic(transport, &remote_path, &local_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                component = "remote_sync",
                event = "sync.period.fetch_failed",
                period = %period,
                remote_path = %remote_path,
                error = %err
            );
            outcome.decision = SyncDecision::FetchFailed;
            outcome.error = Some(err);
            return outcome;
        }
    };
    outcome.bytes = Some(bytes);

    let mtime_preserved = match set_local_mtime(&local_path, remote_mtime) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                component = "remote_sync",
                event = "sync.period.mtime_failed",
                period = %period,
                local_path = %local_path.display(),
                error = %err
            );
            outcome.error = Some(err.to_string());
            false
        }
    };

    info!(
        component = "remote_sync",
        event = "sync.period.fetched",
        period = %period,
        local_path = %local_path.display(),
        bytes,
        remote_mtime,
        had_local_copy = local_entry.is_some()
    );
    outcome.decision = SyncDecision::Fetched { mtime_preserved };
    outcome
}

fn fetch_atomic(
    transport: &dyn RemoteTransport,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64, String> {
    let file_name = local_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| format!("invalid local path: {}", local_path.display()))?;
    let tmp_path = local_path.with_file_name(format!("{file_name}.part"));

    let bytes = match transport.get(remote_path, &tmp_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.to_string());
        }
    };

    // Copies of read-only remote files stay owner-writable.
    if let Err(err) = make_owner_writable(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(format!("cannot make {} writable: {err}", tmp_path.display()));
    }

    if let Err(err) = fs::rename(&tmp_path, local_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(format!("rename to {} failed: {err}", local_path.display()));
    }
    Ok(bytes)
}

/// Local modification time in whole Unix seconds; `None` when the file is absent.
pub fn local_mtime(path: &Path) -> Option<i64> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    metadata
        .modified()
        .ok()
        .map(|modified| DateTime::<Utc>::from(modified).timestamp())
}

/// Sets the modification time of `path` to `unix_seconds`.
///
/// Only ownership of the file is needed on Unix, so read-only copies work.
pub fn set_local_mtime(path: &Path, unix_seconds: i64) -> io::Result<()> {
    let modified = system_time_from_unix(unix_seconds).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("timestamp {unix_seconds} is out of range"),
        )
    })?;
    open_for_times(path)?.set_modified(modified)
}

#[cfg(unix)]
fn open_for_times(path: &Path) -> io::Result<fs::File> {
    fs::File::open(path)
}

#[cfg(not(unix))]
fn open_for_times(path: &Path) -> io::Result<fs::File> {
    fs::File::options().write(true).open(path)
}

#[cfg(unix)]
fn make_owner_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o200 == 0 {
        permissions.set_mode(mode | 0o200);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_owner_writable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn system_time_from_unix(unix_seconds: i64) -> Option<SystemTime> {
    DateTime::<Utc>::from_timestamp(unix_seconds, 0).map(SystemTime::from)
}
