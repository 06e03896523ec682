//! articlepack: bundles a JSON collection of HTML articles with their images as EPUB and as a
//! browsable HTML site, caching downloaded images across runs.

pub mod assets;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod download;
pub mod epub;
pub mod logging;
pub mod model;
pub mod rewrite;
pub mod site;

// Re-exports for CLI and consumers.
pub use assets::{AssetNamer, AssetPool};
pub use download::{
    AssetFetcher, DownloadError, DownloadScheduler, DownloadSummary, FetchError, ImageClient,
    ImageClientBuilder, SchedulerOptions,
};
pub use epub::{write_epub, EpubAssets, EpubError, EpubOptions, EpubVersion};
pub use model::{Article, Document};
pub use rewrite::{ContentRewriter, QualityPolicy};
pub use site::{write_site, SiteError};
