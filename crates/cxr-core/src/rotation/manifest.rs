use cxr_training::{DirLease, RunLayout};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::plan::BatchGroup;
use crate::storage::{StorageError, cleanup_paths, partial_path};

/// Files owned by one batch iteration: its archives and the extraction directory.
///
/// `cleanup` consumes the manifest so it runs exactly once. If an iteration unwinds
/// without calling it, `Drop` removes the files on a best-effort basis.
#[derive(Debug)]
pub struct BatchManifest {
    ordinal: usize,
    urls: Vec<String>,
    archives: Vec<PathBuf>,
    lease: DirLease,
    cleaned: bool,
}

impl BatchManifest {
    /// Resolves local paths for `group` and resets the shared extraction directory.
    pub fn prepare(group: &BatchGroup, layout: &RunLayout) -> Result<Self, StorageError> {
        let extract_dir = layout.extract_dir().to_path_buf();
        // Leftovers from a crashed run must not leak into this batch.
        cleanup_paths(std::slice::from_ref(&extract_dir))?;
        std::fs::create_dir_all(layout.download_dir())
            .map_err(|e| StorageError::io(layout.download_dir(), e))?;

        Ok(Self {
            ordinal: group.ordinal,
            urls: group.links.iter().map(|l| l.url.clone()).collect(),
            archives: group.links.iter().map(|l| layout.archive_path(l.index)).collect(),
            lease: DirLease::new(extract_dir),
            cleaned: false,
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// `(url, local archive path)` pairs in group order.
    pub fn downloads(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.urls.iter().map(String::as_str).zip(self.archives.iter().map(PathBuf::as_path))
    }

    pub fn archives(&self) -> &[PathBuf] {
        &self.archives
    }

    pub fn extract_dir(&self) -> &Path {
        self.lease.path()
    }

    pub fn lease(&self) -> &DirLease {
        &self.lease
    }

    /// Deletes the archives and the extraction directory.
    pub fn cleanup(mut self) -> Result<(), StorageError> {
        self.cleaned = true;
        let holders = self.lease.holders();
        if holders > 1 {
            warn!(batch = self.ordinal, holders, "extraction directory still leased during cleanup");
        }
        let result = cleanup_paths(&self.paths());
        debug!(batch = self.ordinal, ok = result.is_ok(), "batch files removed");
        result
    }

    fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self.archives.clone();
        // an aborted in-flight download leaves only its partial file behind
        paths.extend(self.archives.iter().map(|a| partial_path(a)));
        paths.push(self.lease.path().to_path_buf());
        paths
    }
}

impl Drop for BatchManifest {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        warn!(batch = self.ordinal, "batch manifest dropped without cleanup, removing files");
        if let Err(e) = cleanup_paths(&self.paths()) {
            warn!(batch = self.ordinal, error = %e, "fallback cleanup failed");
        }
    }
}
