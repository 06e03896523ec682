//! Optional config file loading. Search order: ./articlepack.toml, then
//! $XDG_CONFIG_HOME/articlepack/config.toml (or ~/.config/articlepack/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "articlepack.toml";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output root when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Root of the per-book working area.
    pub work_dir: Option<PathBuf>,
    /// Flat image cache shared by all books.
    pub cache_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]). Length should be retry_count - 1.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Maximum number of image fetches in flight.
    pub concurrency: Option<usize>,
    /// Pause in milliseconds before each fetch is dispatched.
    pub dispatch_delay_ms: Option<u64>,
    /// Pause in milliseconds before each cache write.
    pub write_delay_ms: Option<u64>,
    /// Prefer original-quality images over the high-definition variant.
    pub raw_images: Option<bool>,
    /// Height/width ratio above which original quality is always used.
    pub tall_image_ratio: Option<u64>,
    /// Include a visible table-of-contents page after the cover in EPUB (default: true).
    pub toc_page: Option<bool>,
}

/// Candidate config files in search order.
pub fn config_paths(cwd: &Path) -> Vec<PathBuf> {
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("articlepack").join("config.toml"));
    }
    paths
}

/// Load the first existing file of `paths`.
/// Missing files return Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config_from(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

/// Search order: (1) ./articlepack.toml, (2) $XDG_CONFIG_HOME/articlepack/config.toml.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    load_config_from(&config_paths(&cwd))
}

/// `<user cache dir>/articlepack/<leaf>`, or `./.cache/articlepack/<leaf>` when the platform has
/// no cache directory.
pub fn default_cache_subdir(leaf: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("articlepack")
        .join(leaf)
}
