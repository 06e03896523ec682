//! Errors for image fetching and the on-disk cache.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to fetch a single asset. Recovered by the scheduler: logged, counted, skipped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Empty response body from {url}")]
    EmptyPayload { url: String },

    /// Failure raised by a non-HTTP fetcher.
    #[error("Could not fetch {url}: {reason}")]
    Other { url: String, reason: String },
}

/// Cache directory faults. These abort the batch since no asset can be stored.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Cannot use image cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write cached image {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
