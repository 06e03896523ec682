//! Deduplicated set of remote asset URIs collected during one rewrite pass.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Remote URIs discovered while rewriting a document.
///
/// Entries are only ever added until the pool is drained. `add` takes `&self`, so rewrites of
/// different fragments may share one pool across threads.
#[derive(Debug, Default)]
pub struct AssetPool {
    uris: Mutex<HashSet<String>>,
}

impl AssetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `uri`. Returns false when it was already present or empty.
    pub fn add(&self, uri: impl Into<String>) -> bool {
        let uri = uri.into();
        if uri.is_empty() {
            return false;
        }
        self.lock().insert(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.lock().contains(uri)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the current entries, sorted.
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.lock().iter().cloned().collect();
        uris.sort();
        uris
    }

    /// Consume the pool. Sorted so batch logs read the same on every run.
    pub fn drain(self) -> Vec<String> {
        let set = match self.uris.into_inner() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut uris: Vec<String> = set.into_iter().collect();
        uris.sort();
        uris
    }

    // A panicking writer cannot leave the set half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.uris.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
