//! Stylesheets compiled into the binary and copied into every bundle.

use super::BundleError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// (filename, contents) of each bundled stylesheet, in link order.
pub const STYLESHEETS: [(&str, &str); 2] = [
    (
        "normalize.css",
        include_str!("../../resources/css/normalize.css"),
    ),
    (
        "customer.css",
        include_str!("../../resources/css/customer.css"),
    ),
];

/// Write the bundled stylesheets into `css_dir`. Returns their paths in link order.
pub fn copy_static_resources(css_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let mut written = Vec::with_capacity(STYLESHEETS.len());
    for (name, contents) in STYLESHEETS {
        let path = css_dir.join(name);
        std::fs::write(&path, contents).map_err(|e| BundleError::Io {
            path: path.clone(),
            source: e,
        })?;
        debug!("Wrote stylesheet {}", path.display());
        written.push(path);
    }
    Ok(written)
}
