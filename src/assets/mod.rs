//! Asset naming and the per-document asset pool.

mod namer;
mod pool;

pub use namer::{AssetNamer, DEFAULT_HOST_MARKER};
pub use pool::AssetPool;

/// A remote asset and the flat cache filename derived from it. An empty `local_filename` marks
/// an asset that cannot be named and is always skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub remote_uri: String,
    pub local_filename: String,
}

impl AssetReference {
    pub fn new(namer: &AssetNamer, remote_uri: impl Into<String>) -> Self {
        let remote_uri = remote_uri.into();
        let local_filename = namer.name(&remote_uri);
        Self {
            remote_uri,
            local_filename,
        }
    }

    pub fn is_nameable(&self) -> bool {
        !self.local_filename.is_empty()
    }
}
