//! Image fetching: the HTTP client, the fetcher seam, and the batch scheduler.

mod client;
mod error;
mod scheduler;

pub use client::{ImageClient, ImageClientBuilder};
pub use error::{DownloadError, FetchError};
pub use scheduler::{
    DownloadScheduler, DownloadSummary, FetchOutcome, SchedulerOptions, SkipReason,
    DEFAULT_CONCURRENCY, DEFAULT_DISPATCH_DELAY, DEFAULT_WRITE_DELAY,
};

/// Source of asset bytes. Shared by all download workers, hence `Sync`.
///
/// Any failure (network error, non-success status, timeout) is reported as a [`FetchError`];
/// the scheduler treats them all the same way.
pub trait AssetFetcher: Sync {
    fn fetch_bytes(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}
