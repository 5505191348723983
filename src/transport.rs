//! Remote file access used by the price sync.
//!
//! Authentication and host trust are the transport's own business; callers
//! only see `stat` and `get`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote file {path} not found")]
    NotFound { path: String },
    #[error("I/O error on {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Http { url: String, message: String },
    #[error("remote {path} has no usable modification time: {detail}")]
    MissingModifiedTime { path: String, detail: String },
}

/// Remote side of the freshness cache.
pub trait RemoteTransport {
    /// Modification time of `remote_path` in whole seconds since the Unix epoch.
    fn stat(&self, remote_path: &str) -> Result<i64, TransportError>;

    /// Copies `remote_path` to `local_path`, returning the byte count.
    fn get(&self, remote_path: &str, local_path: &Path) -> Result<u64, TransportError>;
}

/// Remote tree reachable as a local directory, e.g. a mounted SFTP share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDirTransport {
    root: PathBuf,
}

impl MirrorDirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote_path: &str) -> PathBuf {
        self.root.join(remote_path.trim_start_matches('/'))
    }
}

impl RemoteTransport for MirrorDirTransport {
    fn stat(&self, remote_path: &str) -> Result<i64, TransportError> {
        let path = self.resolve(remote_path);
        let metadata = fs::metadata(&path).map_err(|err| io_error(remote_path, err))?;
        if !metadata.is_file() {
            return Err(TransportError::NotFound {
                path: remote_path.to_string(),
            });
        }
        let modified = metadata
            .modified()
            .map_err(|err| TransportError::MissingModifiedTime {
                path: remote_path.to_string(),
                detail: err.to_string(),
            })?;
        Ok(DateTime::<Utc>::from(modified).timestamp())
    }

    fn get(&self, remote_path: &str, local_path: &Path) -> Result<u64, TransportError> {
        let source = self.resolve(remote_path);
        debug!(
            component = "transport",
            event = "transport.mirror.copy",
            source = %source.display(),
            target = %local_path.display()
        );
        fs::copy(&source, local_path).map_err(|err| io_error(remote_path, err))
    }
}

fn io_error(remote_path: &str, err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::NotFound {
        TransportError::NotFound {
            path: remote_path.to_string(),
        }
    } else {
        TransportError::Io {
            path: remote_path.to_string(),
            source: err,
        }
    }
}

/// File library served over HTTP(S). `stat` reads `Last-Modified` from a
/// HEAD response. Each call is a single attempt.
#[cfg(feature = "http-transport")]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http-transport")]
impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| TransportError::HttpClientBuild(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url_for(&self, remote_path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            remote_path.trim_start_matches('/')
        )
    }

    fn checked(
        &self,
        url: &str,
        remote_path: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                path: remote_path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }
        Ok(response)
    }
}

#[cfg(feature = "http-transport")]
impl RemoteTransport for HttpTransport {
    fn stat(&self, remote_path: &str) -> Result<i64, TransportError> {
        let url = self.url_for(remote_path);
        let response = self
            .client
            .head(&url)
            .send()
            .map_err(|err| TransportError::Http {
                url: url.clone(),
                message: err.to_string(),
            })?;
        let response = self.checked(&url, remote_path, response)?;

        let header = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .ok_or_else(|| TransportError::MissingModifiedTime {
                path: remote_path.to_string(),
                detail: "Last-Modified header absent".to_string(),
            })?;
        let text = header
            .to_str()
            .map_err(|err| TransportError::MissingModifiedTime {
                path: remote_path.to_string(),
                detail: err.to_string(),
            })?;
        parse_http_date(text).ok_or_else(|| TransportError::MissingModifiedTime {
            path: remote_path.to_string(),
            detail: format!("unparsable Last-Modified '{text}'"),
        })
    }

    fn get(&self, remote_path: &str, local_path: &Path) -> Result<u64, TransportError> {
        let url = self.url_for(remote_path);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| TransportError::Http {
                url: url.clone(),
                message: err.to_string(),
            })?;
        let response = self.checked(&url, remote_path, response)?;
        let bytes = response.bytes().map_err(|err| TransportError::Http {
            url: url.clone(),
            message: err.to_string(),
        })?;

        fs::write(local_path, &bytes).map_err(|source| TransportError::Io {
            path: local_path.display().to_string(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}

/// Parses an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`) into Unix seconds.
pub fn parse_http_date(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.timestamp())
}
