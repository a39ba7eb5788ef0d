use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure while talking to the release index or persisting what it returned.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unable to persist release snapshot: {0}")]
    Persist(#[source] io::Error),
    #[error("network access is disabled")]
    Offline,
}

/// A cache file exists but cannot be used. Callers treat the value as absent.
#[derive(Debug, Error)]
pub enum CacheReadError {
    #[error("{path} not found")]
    Missing { path: PathBuf },
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} is invalid: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
#[error("release {tag} has no asset matching `{pattern}`")]
pub struct NoMatchingAssetError {
    pub tag: String,
    pub pattern: String,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    NoMatchingAsset(#[from] NoMatchingAssetError),
    #[error("download failed: {0}")]
    Download(String),
    #[error("download incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("unable to move files into the cache: {0}")]
    Commit(String),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("installation interrupted")]
    Interrupted,
}

impl InstallError {
    pub fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

/// Top-level failure of a launcher run.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("no releases available: {0}")]
    NothingToShow(#[source] FetchError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("terminal error: {0}")]
    Terminal(#[source] io::Error),
    #[error("unable to update the cache: {0}")]
    Cache(#[source] io::Error),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
