//! Bounded, paced download of an asset pool into the flat image cache.

use super::error::{DownloadError, FetchError};
use super::AssetFetcher;
use crate::assets::{AssetNamer, AssetPool, AssetReference};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_millis(1);
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(10);

/// Worker count and pacing for a download batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Maximum number of fetches in flight at once.
    pub concurrency: usize,
    /// Pause before each task is handed to the workers.
    pub dispatch_delay: Duration,
    /// Pause between receiving an image and writing it to the cache.
    pub write_delay: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dispatch_delay: DEFAULT_DISPATCH_DELAY,
            write_delay: DEFAULT_WRITE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The cache already holds a file with this name.
    Cached,
    /// No local filename could be derived from the URI.
    Unnameable,
}

/// Terminal state of one pooled asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { bytes: usize },
    Skipped(SkipReason),
    Failed(String),
}

/// Per-outcome counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadSummary {
    pub fn total(&self) -> usize {
        self.fetched + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched { .. } => self.fetched += 1,
            FetchOutcome::Skipped(_) => self.skipped += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
        }
    }
}

struct Job {
    index: usize,
    reference: AssetReference,
    path: PathBuf,
}

struct TaskResult {
    outcome: FetchOutcome,
    write_error: Option<DownloadError>,
}

/// Drains an [`AssetPool`] into a cache directory.
///
/// Every URI ends in exactly one [`FetchOutcome`]. Individual failures are logged and counted;
/// only cache directory faults are returned as errors, and only after every dispatched task has
/// finished.
pub struct DownloadScheduler<'a, F: AssetFetcher + ?Sized> {
    fetcher: &'a F,
    namer: AssetNamer,
    options: SchedulerOptions,
    progress: Option<&'a dyn Fn(usize, usize)>,
}

impl<'a, F: AssetFetcher + ?Sized> DownloadScheduler<'a, F> {
    pub fn new(fetcher: &'a F, namer: AssetNamer, options: SchedulerOptions) -> Self {
        Self {
            fetcher,
            namer,
            options,
            progress: None,
        }
    }

    /// Called with (resolved, total) each time an asset reaches its outcome.
    pub fn with_progress(mut self, progress: &'a dyn Fn(usize, usize)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run(&self, pool: AssetPool, cache_dir: &Path) -> Result<DownloadSummary, DownloadError> {
        let cache_dir_err = |source| DownloadError::CacheDir {
            path: cache_dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(cache_dir).map_err(cache_dir_err)?;
        fs::read_dir(cache_dir).map_err(cache_dir_err)?;

        let uris = pool.drain();
        let total = uris.len();
        info!("{} image(s) in pool, cache at {}", total, cache_dir.display());

        let mut summary = DownloadSummary::default();
        let mut resolved = 0;
        let mut report = |summary: &mut DownloadSummary, outcome: &FetchOutcome| {
            summary.record(outcome);
            resolved += 1;
            if let Some(progress) = self.progress {
                progress(resolved, total);
            }
        };

        let mut jobs = Vec::new();
        let mut claimed: HashMap<String, String> = HashMap::new();
        for (i, uri) in uris.into_iter().enumerate() {
            let index = i + 1;
            let reference = AssetReference::new(&self.namer, uri);
            if !reference.is_nameable() {
                warn!(
                    "[image {}/{}] no local filename for {}, skipping",
                    index, total, reference.remote_uri
                );
                report(&mut summary, &FetchOutcome::Skipped(SkipReason::Unnameable));
                continue;
            }
            if let Some(previous) = claimed.insert(
                reference.local_filename.clone(),
                reference.remote_uri.clone(),
            ) {
                warn!(
                    "{} and {} share cache name {}; the last one written wins",
                    previous, reference.remote_uri, reference.local_filename
                );
            }
            let path = cache_dir.join(&reference.local_filename);
            if path.try_exists().map_err(cache_dir_err)? {
                debug!("[image {}/{}] cached: {}", index, total, path.display());
                report(&mut summary, &FetchOutcome::Skipped(SkipReason::Cached));
                continue;
            }
            jobs.push(Job {
                index,
                reference,
                path,
            });
        }

        if jobs.is_empty() {
            info!("Nothing to download");
            return Ok(summary);
        }

        let workers = self.options.concurrency.max(1).min(jobs.len());
        info!("Downloading {} image(s) with {} worker(s)", jobs.len(), workers);

        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(workers);
        let job_rx = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>();
        let fetcher = self.fetcher;
        let write_delay = self.options.write_delay;
        let mut write_error: Option<DownloadError> = None;
        let mut handle = |result: TaskResult, summary: &mut DownloadSummary| {
            report(summary, &result.outcome);
            if write_error.is_none() {
                write_error = result.write_error;
            }
        };

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    while let Some(job) = next_job(job_rx) {
                        let result = execute(fetcher, write_delay, job, total);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for job in jobs {
                thread::sleep(self.options.dispatch_delay);
                debug!(
                    "[image {}/{}] queued {}",
                    job.index, total, job.reference.remote_uri
                );
                if job_tx.send(job).is_err() {
                    break;
                }
                while let Ok(result) = result_rx.try_recv() {
                    handle(result, &mut summary);
                }
            }
            drop(job_tx);

            // Drain: the result channel closes once every worker has exited.
            for result in result_rx.iter() {
                handle(result, &mut summary);
            }
        });

        info!(
            "Images done: {} fetched, {} skipped, {} failed",
            summary.fetched, summary.skipped, summary.failed
        );
        match write_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

fn next_job(rx: &Mutex<Receiver<Job>>) -> Option<Job> {
    let guard = match rx.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.recv().ok()
}

fn execute<F: AssetFetcher + ?Sized>(
    fetcher: &F,
    write_delay: Duration,
    job: Job,
    total: usize,
) -> TaskResult {
    let uri = &job.reference.remote_uri;
    debug!("[image {}/{}] downloading {}", job.index, total, uri);
    let bytes = match fetcher.fetch_bytes(uri) {
        Ok(bytes) if bytes.is_empty() => {
            let e = FetchError::EmptyPayload { url: uri.clone() };
            warn!("[image {}/{}] {}, skipping", job.index, total, e);
            return failed(e.to_string());
        }
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("[image {}/{}] download failed, skipping: {}", job.index, total, e);
            return failed(e.to_string());
        }
    };

    thread::sleep(write_delay);
    if let Err(source) = write_cache_file(&job.path, &bytes) {
        warn!(
            "[image {}/{}] could not write {}: {}",
            job.index,
            total,
            job.path.display(),
            source
        );
        return TaskResult {
            outcome: FetchOutcome::Failed(source.to_string()),
            write_error: Some(DownloadError::CacheWrite {
                path: job.path,
                source,
            }),
        };
    }
    debug!(
        "[image {}/{}] saved {} ({} bytes)",
        job.index,
        total,
        job.path.display(),
        bytes.len()
    );
    TaskResult {
        outcome: FetchOutcome::Fetched { bytes: bytes.len() },
        write_error: None,
    }
}

fn failed(reason: String) -> TaskResult {
    TaskResult {
        outcome: FetchOutcome::Failed(reason),
        write_error: None,
    }
}

/// Write through a uniquely named temporary file in the cache directory, then rename it into
/// place. An interrupted run never leaves a truncated entry that a later run would treat as
/// cached, and two tasks sharing a name never touch each other's partial file.
fn write_cache_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut part = tempfile::Builder::new()
        .prefix(".part-")
        .tempfile_in(dir)?;
    part.write_all(bytes)?;
    part.persist(path).map_err(|e| e.error)?;
    Ok(())
}
