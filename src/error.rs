//! Error types for each stage of a categorization run.
//!
//! Start-up errors ([`ConfigError`], [`FeedError`]) abort before any work is
//! done. Per-record errors ([`ClassifyError`], [`RetryError`]) are contained by
//! the pipeline. [`StoreError`] raised while flushing ends the run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while loading or validating `config.yaml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures fetching the source article feed.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("invalid feed url {0}")]
    InvalidUrl(String),

    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {status}")]
    Status { status: reqwest::StatusCode },

    #[error("feed is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A single failed classifier call.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The classifier asked us to slow down (HTTP 429 or equivalent).
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("classifier returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unusable classifier response: {0}")]
    Response(String),
}

impl ClassifyError {
    /// Only rate limiting is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifyError::RateLimited(_))
    }
}

/// Outcome of a call wrapped by the backoff controller that did not succeed.
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("terminal failure: {cause}")]
    Terminal { cause: E },

    #[error("gave up after {attempts} attempts (waited {waited:?}): {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        waited: Duration,
        last: E,
    },
}

/// Failures loading or persisting the result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record with key {0} is already stored")]
    DuplicateKey(String),

    #[error("store io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that stop a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to persist results: {0}")]
    Persist(#[from] StoreError),
}
