//! Deterministic local filenames for remote assets.

/// Host marker used when none is configured. Image hosts serve from `*.com` domains, so the
/// part after the first `.com` is the asset path.
pub const DEFAULT_HOST_MARKER: &str = ".com";

/// Maps a remote asset URI to a flat, filesystem-safe filename.
///
/// The empty string means "unnameable": callers skip the asset instead of treating it as a cache
/// miss.
#[derive(Debug, Clone)]
pub struct AssetNamer {
    host_marker: String,
}

impl Default for AssetNamer {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_MARKER)
    }
}

impl AssetNamer {
    pub fn new(host_marker: impl Into<String>) -> Self {
        Self {
            host_marker: host_marker.into(),
        }
    }

    /// Local filename for `remote_uri`, or `""` when the marker is missing or nothing usable
    /// remains after sanitizing.
    pub fn name(&self, remote_uri: &str) -> String {
        if self.host_marker.is_empty() {
            return String::new();
        }
        let rest = match remote_uri.find(&self.host_marker) {
            Some(i) => &remote_uri[i + self.host_marker.len()..],
            None => return String::new(),
        };
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        let name = encode_filename(path.trim_matches('/'));
        if name.trim_matches('_').is_empty() {
            return String::new();
        }
        name
    }
}

/// Replace everything that is unsafe in a file name or in an `href` with `_`.
fn encode_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else if !c.is_ascii() && c.is_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}
