//! CLI parsing and orchestration. Loads a document, rewrites it, downloads its images, and writes
//! the EPUB and HTML site. Maps errors to exit codes.

use crate::assets::{AssetNamer, AssetPool};
use crate::bundle::{
    book_dir_name, copy_cached_images, copy_static_resources, publish, BookPaths, BundleError,
};
use crate::config::{self, Config};
use crate::download::{
    AssetFetcher, DownloadError, DownloadScheduler, DownloadSummary, ImageClient,
    SchedulerOptions, DEFAULT_CONCURRENCY,
};
use crate::epub::{write_epub, EpubAssets, EpubError, EpubOptions, EpubVersion};
use crate::model::Document;
use crate::rewrite::{ContentRewriter, QualityPolicy, DEFAULT_TALL_IMAGE_RATIO};
use crate::site::{write_site, SiteError};
use clap::Parser;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("{0}")]
    Bundle(#[from] BundleError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Site(#[from] SiteError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Client(_) | CliRunError::Download(_) => 2,
            CliRunError::Bundle(_) | CliRunError::Epub(_) | CliRunError::Site(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "articlepack")]
#[command(about = "Bundle a JSON article collection with its images as EPUB and HTML")]
#[command(
    after_help = "Config file keys (output_dir, work_dir, cache_dir, user_agent, timeout_secs, retry_count, retry_backoff_secs, concurrency, dispatch_delay_ms, write_delay_ms, raw_images, tall_image_ratio, toc_page) are read from ./articlepack.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    /// Document JSON: title, author, optional description/coverUrl/sourceUrl, and articles.
    pub document: PathBuf,

    /// Output root. The book lands in <OUTPUT>/<name>/. Default: ./output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Image cache directory shared across runs.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Working area root for intermediate files.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Prefer original-quality images over the high-definition variant.
    #[arg(long)]
    pub raw_images: bool,

    /// Maximum number of concurrent image downloads (overrides config; default 5).
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Generate EPUB 2 instead of EPUB 3.
    #[arg(long)]
    pub epub_2: bool,

    /// Include toc.ncx in EPUB 3 output for legacy readers (no effect for EPUB 2, which always includes NCX).
    #[arg(long)]
    pub ncx: bool,

    /// Do not download; bundle only images already in the cache.
    #[arg(long)]
    pub skip_download: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and verbose error chain.
    #[arg(long)]
    pub verbose: bool,
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let n: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid --concurrency: '{}' is not a number", s))?;
    if n == 0 {
        return Err("Invalid --concurrency: must be at least 1".to_string());
    }
    Ok(n)
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// Effective settings after merging CLI flags over the config file over built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_secs: Vec<u64>,
    pub scheduler: SchedulerOptions,
    pub raw_images: bool,
    pub tall_image_ratio: u64,
    pub epub: EpubOptions,
    pub skip_download: bool,
}

impl Settings {
    pub fn resolve(args: &Args, config: Option<&Config>) -> Self {
        let output_dir = args
            .output
            .clone()
            .or_else(|| config.and_then(|c| c.output_dir.clone()))
            .unwrap_or_else(|| PathBuf::from("output"));
        let work_dir = args
            .work_dir
            .clone()
            .or_else(|| config.and_then(|c| c.work_dir.clone()))
            .unwrap_or_else(|| config::default_cache_subdir("work"));
        let cache_dir = args
            .cache_dir
            .clone()
            .or_else(|| config.and_then(|c| c.cache_dir.clone()))
            .unwrap_or_else(|| config::default_cache_subdir("image"));

        let defaults = SchedulerOptions::default();
        let scheduler = SchedulerOptions {
            concurrency: args
                .concurrency
                .or_else(|| config.and_then(|c| c.concurrency))
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
            dispatch_delay: config
                .and_then(|c| c.dispatch_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.dispatch_delay),
            write_delay: config
                .and_then(|c| c.write_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_delay),
        };

        let epub = EpubOptions {
            version: if args.epub_2 {
                EpubVersion::Epub2
            } else {
                EpubVersion::Epub3
            },
            include_ncx: args.ncx,
            include_toc_page: config.and_then(|c| c.toc_page).unwrap_or(true),
        };

        Self {
            output_dir,
            work_dir,
            cache_dir,
            user_agent: args
                .user_agent
                .clone()
                .or_else(|| config.and_then(|c| c.user_agent.clone())),
            timeout_secs: args
                .timeout
                .or_else(|| config.and_then(|c| c.timeout_secs))
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: config
                .and_then(|c| c.retry_count)
                .unwrap_or(DEFAULT_RETRY_COUNT)
                .max(1),
            retry_backoff_secs: config
                .and_then(|c| c.retry_backoff_secs.clone())
                .unwrap_or_else(|| vec![1, 2, 4]),
            scheduler,
            raw_images: args.raw_images || config.and_then(|c| c.raw_images).unwrap_or(false),
            tall_image_ratio: config
                .and_then(|c| c.tall_image_ratio)
                .filter(|r| *r > 0)
                .unwrap_or(DEFAULT_TALL_IMAGE_RATIO),
            epub,
            skip_download: args.skip_download,
        }
    }

    fn build_client(&self) -> Result<ImageClient, CliRunError> {
        let mut builder = ImageClient::builder()
            .timeout_secs(self.timeout_secs)
            .retry_count(self.retry_count)
            .retry_backoff_secs(self.retry_backoff_secs.clone());
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        builder.build().map_err(CliRunError::Client)
    }
}

/// Read and validate the document JSON.
pub fn load_document(path: &Path) -> Result<Document, CliRunError> {
    let f = std::fs::File::open(path).map_err(|e| {
        CliRunError::InvalidInput(format!("Cannot read document {}: {}", path.display(), e))
    })?;
    let doc: Document = serde_json::from_reader(std::io::BufReader::new(f)).map_err(|e| {
        CliRunError::InvalidInput(format!("Invalid document {}: {}", path.display(), e))
    })?;
    if doc.title.trim().is_empty() {
        return Err(CliRunError::InvalidInput(format!(
            "Invalid document {}: title is empty.",
            path.display()
        )));
    }
    if doc.articles.is_empty() {
        return Err(CliRunError::InvalidInput(format!(
            "Invalid document {}: no articles.",
            path.display()
        )));
    }
    Ok(doc)
}

/// Cover URL with scheme-less `//host/...` made `https:`. Non-HTTP values are ignored.
fn cover_uri(doc: &Document) -> Option<String> {
    let url = doc.cover_url.as_deref()?.trim();
    if let Some(rest) = url.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    if url.starts_with("https://") || url.starts_with("http://") {
        Some(url.to_string())
    } else {
        None
    }
}

/// Result of packing one document.
#[derive(Debug)]
pub struct PackReport {
    /// `None` when downloading was skipped.
    pub downloads: Option<DownloadSummary>,
    pub images_bundled: usize,
    pub epub_path: PathBuf,
    pub site_dir: PathBuf,
}

/// Rewrite, download, and bundle `doc`. With no `fetcher`, only already cached images are used.
pub fn pack(
    doc: &Document,
    settings: &Settings,
    fetcher: Option<&dyn AssetFetcher>,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<PackReport, CliRunError> {
    let paths = BookPaths::new(
        &settings.work_dir,
        &settings.output_dir,
        book_dir_name(&doc.title),
    );
    paths.init()?;

    let namer = AssetNamer::default();
    let rewriter = ContentRewriter::new(
        namer.clone(),
        QualityPolicy {
            tall_image_ratio: settings.tall_image_ratio,
        },
    );
    let pool = AssetPool::new();
    let rewritten = rewriter.rewrite_document(doc, settings.raw_images, &pool);
    let cover = cover_uri(doc);
    if let Some(uri) = &cover {
        pool.add(uri.clone());
    }
    let uris = pool.uris();
    info!(
        "{} article(s), {} distinct image(s)",
        rewritten.articles.len(),
        uris.len()
    );

    let downloads = match fetcher {
        Some(fetcher) => {
            let mut scheduler =
                DownloadScheduler::new(fetcher, namer.clone(), settings.scheduler);
            if let Some(progress) = progress {
                scheduler = scheduler.with_progress(progress);
            }
            Some(scheduler.run(pool, &settings.cache_dir)?)
        }
        None => {
            info!("Skipping download, using cache at {}", settings.cache_dir.display());
            None
        }
    };

    let images = copy_cached_images(&uris, &namer, &settings.cache_dir, &paths.image_dir())?;
    let stylesheets = copy_static_resources(&paths.css_dir())?;

    write_site(
        &rewritten,
        paths.name(),
        &paths.site_dir(),
        &paths.pages_dir(),
        &paths.single_page_dir(),
        &stylesheets,
    )?;

    let cover_image = cover
        .map(|uri| namer.name(&uri))
        .filter(|name| !name.is_empty())
        .map(|name| paths.image_dir().join(name))
        .filter(|path| images.contains(path));
    let assets = EpubAssets {
        images: images.clone(),
        stylesheets,
        cover_image,
    };
    write_epub(&rewritten, &paths.epub_work_path(), &assets, settings.epub)?;

    publish(&paths)?;

    Ok(PackReport {
        downloads,
        images_bundled: images.len(),
        epub_path: paths.epub_output_path(),
        site_dir: paths.site_output_dir(),
    })
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = Settings::resolve(args, config.as_ref());
    let doc = load_document(&args.document)?;

    let client = if settings.skip_download {
        None
    } else {
        Some(settings.build_client()?)
    };

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |done: usize, total: usize| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            bar.set_style(
                indicatif::ProgressStyle::default_bar()
                    .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .progress_chars("█▉▊▋▌▍▎▏ "),
            );
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(done as u64);
        pb.set_message(format!("Fetching image {}/{}", done, total));
    };
    let progress: Option<&dyn Fn(usize, usize)> = if args.quiet { None } else { Some(&progress_cb) };

    let fetcher = client.as_ref().map(|c| c as &dyn AssetFetcher);
    let result = pack(&doc, &settings, fetcher, progress);

    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let report = result?;

    if !args.quiet {
        if let Some(summary) = report.downloads {
            eprintln!(
                "Images: {} fetched, {} skipped, {} failed",
                summary.fetched, summary.skipped, summary.failed
            );
        }
        eprintln!("Bundled {} image(s)", report.images_bundled);
        eprintln!("Wrote {}", report.epub_path.display());
        eprintln!("Wrote {}", report.site_dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::FetchError;
    use crate::model::Article;

    struct FixedFetcher;

    impl AssetFetcher for FixedFetcher {
        fn fetch_bytes(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
            if uri.contains("broken") {
                Err(FetchError::HttpStatus {
                    status: 404,
                    url: uri.to_string(),
                })
            } else {
                Ok(uri.as_bytes().to_vec())
            }
        }
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["articlepack", "doc.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn sample_doc() -> Document {
        Document {
            title: "Collected Answers".to_string(),
            author: "someone".to_string(),
            description: Some("Answers about Rust.".to_string()),
            cover_url: Some("//pic1.zhimg.com/v2-cover.jpg".to_string()),
            source_url: None,
            articles: vec![
                Article {
                    title: "First".to_string(),
                    index: 1,
                    body: r#"<p>One</p><img data-rawwidth="600" data-rawheight="400" data-actualsrc="https://pic1.zhimg.com/v2-a_b.jpg" data-original="https://pic1.zhimg.com/v2-a_r.jpg">"#
                        .to_string(),
                },
                Article {
                    title: "Second".to_string(),
                    index: 2,
                    body: r#"<p>Two</p><img data-actualsrc="https://pic1.zhimg.com/v2-broken_b.jpg">"#
                        .to_string(),
                },
            ],
        }
    }

    fn temp_settings(root: &Path, extra: &[&str]) -> Settings {
        let mut settings = Settings::resolve(&args(extra), None);
        settings.output_dir = root.join("out");
        settings.work_dir = root.join("work");
        settings.cache_dir = root.join("cache");
        settings.scheduler.dispatch_delay = Duration::ZERO;
        settings.scheduler.write_delay = Duration::ZERO;
        settings
    }

    #[test]
    fn parse_concurrency_rejects_zero_and_garbage() {
        assert_eq!(parse_concurrency("4").unwrap(), 4);
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("many").is_err());
    }

    #[test]
    fn settings_defaults_without_config() {
        let s = Settings::resolve(&args(&[]), None);
        assert_eq!(s.output_dir, PathBuf::from("output"));
        assert!(s.cache_dir.ends_with("articlepack/image"));
        assert!(s.work_dir.ends_with("articlepack/work"));
        assert_eq!(s.timeout_secs, 30);
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.scheduler, SchedulerOptions::default());
        assert!(!s.raw_images);
        assert_eq!(s.tall_image_ratio, DEFAULT_TALL_IMAGE_RATIO);
        assert_eq!(s.epub, EpubOptions::default());
    }

    #[test]
    fn cli_flags_override_config() {
        let config: Config = toml::from_str(
            r#"
            output_dir = "from-config"
            concurrency = 2
            timeout_secs = 90
            raw_images = false
            tall_image_ratio = 6
            toc_page = false
            write_delay_ms = 0
        "#,
        )
        .unwrap();
        let s = Settings::resolve(
            &args(&["-o", "from-cli", "--concurrency", "9", "--raw-images", "--epub-2"]),
            Some(&config),
        );
        assert_eq!(s.output_dir, PathBuf::from("from-cli"));
        assert_eq!(s.scheduler.concurrency, 9);
        assert_eq!(s.scheduler.write_delay, Duration::ZERO);
        assert_eq!(s.timeout_secs, 90);
        assert!(s.raw_images);
        assert_eq!(s.tall_image_ratio, 6);
        assert_eq!(s.epub.version, EpubVersion::Epub2);
        assert!(!s.epub.include_toc_page);
    }

    #[test]
    fn load_document_reports_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_document(&dir.path().join("none.json")).unwrap_err();
        assert_eq!(missing.exit_code(), 1);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            load_document(&bad),
            Err(CliRunError::InvalidInput(msg)) if msg.starts_with("Invalid document")
        ));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, r#"{"title":"T","author":"A","articles":[]}"#).unwrap();
        assert!(load_document(&empty).is_err());
    }

    #[test]
    fn load_document_reads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, serde_json::to_string(&sample_doc()).unwrap()).unwrap();
        let doc = load_document(&path).unwrap();
        assert_eq!(doc.articles.len(), 2);
    }

    #[test]
    fn cover_uri_normalizes_scheme() {
        let mut doc = sample_doc();
        assert_eq!(
            cover_uri(&doc).as_deref(),
            Some("https://pic1.zhimg.com/v2-cover.jpg")
        );
        doc.cover_url = Some("cover.jpg".to_string());
        assert!(cover_uri(&doc).is_none());
        doc.cover_url = None;
        assert!(cover_uri(&doc).is_none());
    }

    #[test]
    fn pack_writes_epub_and_site() {
        let root = tempfile::tempdir().unwrap();
        let settings = temp_settings(root.path(), &[]);
        let report = pack(&sample_doc(), &settings, Some(&FixedFetcher as &dyn AssetFetcher), None).unwrap();

        let summary = report.downloads.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(report.images_bundled, 2);

        let book = root.path().join("out").join("Collected-Answers");
        assert_eq!(report.epub_path, book.join("Collected-Answers.epub"));
        assert!(report.epub_path.is_file());
        assert!(book.join("html/index.html").is_file());
        assert!(book.join("html/html/0001.html").is_file());
        assert!(book.join("html/single/Collected-Answers.html").is_file());
        assert!(book.join("html/css/customer.css").is_file());
        assert!(book.join("html/image/v2-a_b.jpg").is_file());
        assert!(book.join("html/image/v2-cover.jpg").is_file());
        assert!(!book.join("html/image/v2-broken_b.jpg").exists());

        let page = std::fs::read_to_string(book.join("html/html/0001.html")).unwrap();
        assert!(page.contains(r#"src="../image/v2-a_b.jpg""#));
    }

    #[test]
    fn pack_twice_uses_cache() {
        let root = tempfile::tempdir().unwrap();
        let settings = temp_settings(root.path(), &[]);
        pack(&sample_doc(), &settings, Some(&FixedFetcher as &dyn AssetFetcher), None).unwrap();
        let second = pack(&sample_doc(), &settings, Some(&FixedFetcher as &dyn AssetFetcher), None).unwrap();
        let summary = second.downloads.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn pack_without_fetcher_bundles_only_cached_images() {
        let root = tempfile::tempdir().unwrap();
        let settings = temp_settings(root.path(), &["--skip-download"]);
        std::fs::create_dir_all(&settings.cache_dir).unwrap();
        std::fs::write(settings.cache_dir.join("v2-a_b.jpg"), b"cached").unwrap();
        let report = pack(&sample_doc(), &settings, None, None).unwrap();
        assert!(report.downloads.is_none());
        assert_eq!(report.images_bundled, 1);
        assert!(report.epub_path.is_file());
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Download(DownloadError::CacheDir {
                path: PathBuf::from("/x"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            })
            .exit_code(),
            2
        );
        assert_eq!(CliRunError::Epub(EpubError::EmptyTitle).exit_code(), 3);
        assert_eq!(CliRunError::Site(SiteError::EmptyTitle).exit_code(), 3);
        assert_eq!(
            CliRunError::Bundle(BundleError::Io {
                path: PathBuf::from("/x"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            })
            .exit_code(),
            3
        );
    }
}
