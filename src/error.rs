use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Failures talking to the Planet data API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Timeouts, dropped connections and server side errors are worth another try. Malformed
    /// bodies and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed(_) | Self::Url(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if let Some(status) = err.status() {
            Self::Status {
                url,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Local storage error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Local storage failures are retried like transient network errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(err) => err.is_transient(),
            Self::Io { .. } => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unable to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unable to parse geometry file {}: {source}", path.display())]
    Geometry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Geometry file {} holds no geometry", .0.display())]
    EmptyGeometry(PathBuf),

    #[error("No regions configured")]
    NoRegions,

    #[error("Region {region}: date range starts after it ends ({from} > {to})")]
    DateRange {
        region: String,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("Region {region}: cloud limit {limit} is outside 0..=1")]
    CloudLimit { region: String, limit: f64 },

    #[error("No API key configured")]
    MissingApiKey,

    #[error("Unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
