use std::path::PathBuf;

use thiserror::Error;

/// Why a site's listing could not be turned into items.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("unexpected page structure at {url}: {reason}")]
    ParseFormat { url: String, reason: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::HttpStatus { .. } => "http status",
            FetchError::ParseFormat { .. } => "parse format",
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read state {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupted state {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sheets request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sheets API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("workbook error: {0}")]
    Workbook(#[from] rusqlite::Error),
    #[error("invalid worksheet target {0:?}")]
    Target(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    Status(u16),
}

/// Fatal at startup: nothing is processed when the configuration is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("site configuration not found at {0:?}")]
    Missing(PathBuf),
    #[error("malformed site configuration: {0}")]
    Malformed(#[from] config::ConfigError),
    #[error("site {site}: {reason}")]
    InvalidSite { site: String, reason: String },
    #[error("duplicate site id {0:?}")]
    DuplicateSite(String),
    #[error("sites {first:?} and {second:?} share the state file {path:?}")]
    SharedStateFile {
        first: String,
        second: String,
        path: PathBuf,
    },
    #[error("no configured site matches {0}")]
    NoMatchingSite(String),
    #[error("unknown site {0:?}")]
    UnknownSite(String),
    #[error("invalid item url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0}")]
    Backend(String),
}

/// Whatever stopped one site's run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}
