//! Per-document directory layout, copying cached images into the bundle, and publishing the
//! finished EPUB and HTML site.

mod resources;

pub use resources::{copy_static_resources, STYLESHEETS};

use crate::assets::AssetNamer;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Cannot prepare bundle: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BundleError + '_ {
    move |source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory name for a document title: letters and digits kept (any script), everything else
/// collapsed to single dashes.
pub fn book_dir_name(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>();
    // Collapse multiple dashes and trim
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

/// Working and output locations for one document.
///
/// ```text
/// <work_dir>/<name>/epub/<name>.epub
/// <work_dir>/<name>/html/{index.html, html/, single/, css/, image/}
/// <output_dir>/<name>/{<name>.epub, html/}
/// ```
#[derive(Debug, Clone)]
pub struct BookPaths {
    name: String,
    work: PathBuf,
    output: PathBuf,
}

impl BookPaths {
    pub fn new(work_dir: &Path, output_dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            work: work_dir.join(&name),
            output: output_dir.join(&name),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epub_work_dir(&self) -> PathBuf {
        self.work.join("epub")
    }

    pub fn epub_work_path(&self) -> PathBuf {
        self.epub_work_dir().join(format!("{}.epub", self.name))
    }

    /// Root of the HTML site (holds `index.html`).
    pub fn site_dir(&self) -> PathBuf {
        self.work.join("html")
    }

    /// One page per article.
    pub fn pages_dir(&self) -> PathBuf {
        self.site_dir().join("html")
    }

    /// Single-file version of the whole document.
    pub fn single_page_dir(&self) -> PathBuf {
        self.site_dir().join("single")
    }

    pub fn css_dir(&self) -> PathBuf {
        self.site_dir().join("css")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.site_dir().join("image")
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn epub_output_path(&self) -> PathBuf {
        self.output.join(format!("{}.epub", self.name))
    }

    pub fn site_output_dir(&self) -> PathBuf {
        self.output.join("html")
    }

    /// Remove the previous work and output directories of this document and recreate the
    /// layout. The shared image cache lives elsewhere and is not touched.
    pub fn init(&self) -> Result<(), BundleError> {
        for dir in [&self.work, &self.output] {
            if dir.exists() {
                info!("Removing previous directory {}", dir.display());
                fs::remove_dir_all(dir).map_err(io_err(dir))?;
            }
        }
        for dir in [
            self.epub_work_dir(),
            self.pages_dir(),
            self.single_page_dir(),
            self.css_dir(),
            self.image_dir(),
            self.output.clone(),
        ] {
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        debug!("Created bundle layout for {}", self.name);
        Ok(())
    }
}

/// Copy each pooled image from the flat cache into `image_dir`, in `uris` order.
///
/// Unnameable URIs are skipped silently; images missing from the cache (failed downloads) are
/// logged and skipped. Returns the copied paths.
pub fn copy_cached_images(
    uris: &[String],
    namer: &AssetNamer,
    cache_dir: &Path,
    image_dir: &Path,
) -> Result<Vec<PathBuf>, BundleError> {
    let total = uris.len();
    let mut copied: Vec<PathBuf> = Vec::with_capacity(total);
    for (i, uri) in uris.iter().enumerate() {
        let filename = namer.name(uri);
        if filename.is_empty() {
            continue;
        }
        let from = cache_dir.join(&filename);
        let to = image_dir.join(&filename);
        if !from.exists() {
            warn!("[image {}/{}] not in cache, skipping: {}", i + 1, total, uri);
            continue;
        }
        if copied.contains(&to) {
            continue;
        }
        fs::copy(&from, &to).map_err(io_err(&to))?;
        debug!("[image {}/{}] copied {}", i + 1, total, filename);
        copied.push(to);
    }
    info!("Copied {} of {} image(s) into the bundle", copied.len(), total);
    Ok(copied)
}

/// Copy the finished EPUB and mirror the HTML site into the output directory.
pub fn publish(paths: &BookPaths) -> Result<(), BundleError> {
    let epub_from = paths.epub_work_path();
    let epub_to = paths.epub_output_path();
    fs::copy(&epub_from, &epub_to).map_err(io_err(&epub_to))?;
    copy_dir_recursive(&paths.site_dir(), &paths.site_output_dir())?;
    info!("Published {}", paths.output_dir().display());
    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<(), BundleError> {
    fs::create_dir_all(to).map_err(io_err(to))?;
    for entry in fs::read_dir(from).map_err(io_err(from))? {
        let entry = entry.map_err(io_err(from))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if entry.file_type().map_err(io_err(&src))?.is_dir() {
            copy_dir_recursive(&src, &dst)?;
        } else {
            fs::copy(&src, &dst).map_err(io_err(&dst))?;
        }
    }
    Ok(())
}
