//! File-count pre-pass used as the progress denominator.

use std::path::{Path, PathBuf};

use rayon::ThreadPool;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dirscope_core::ScanWarning;

use crate::entry::{EntryKind, list_directory};

/// Result of a count pre-pass.
#[derive(Debug, Default)]
pub struct FileCount {
    /// Regular files found (partial if cancelled).
    pub files: u64,
    /// Directories that could not be listed; each contributed 0.
    pub errors: Vec<ScanWarning>,
    /// Whether the count stopped early because of cancellation.
    pub cancelled: bool,
}

impl FileCount {
    fn merge(mut self, other: FileCount) -> Self {
        self.files += other.files;
        self.errors.extend(other.errors);
        self.cancelled |= other.cancelled;
        self
    }
}

/// Recursively counts files below a directory.
///
/// Symlinked directories are not descended into and count as zero, so a
/// target reachable only through a link is left out of the denominator.
/// Cancellation is checked before each listing and after each entry.
#[derive(Debug, Clone)]
pub struct FileCounter {
    cancel: CancellationToken,
    include_hidden: bool,
}

impl FileCounter {
    /// Create a counter that stops when `cancel` fires.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            include_hidden: true,
        }
    }

    /// Whether dot-files are counted.
    pub fn include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    /// Count sequentially on the calling thread.
    pub fn count(&self, root: &Path) -> FileCount {
        let mut result = FileCount::default();
        self.count_sequential(root, &mut result);
        result.cancelled = self.cancel.is_cancelled();
        result
    }

    /// Count with fork-join parallelism over subdirectories on `pool`.
    pub fn count_on(&self, pool: &ThreadPool, root: &Path) -> FileCount {
        let mut result = pool.install(|| self.count_parallel(root));
        result.cancelled = self.cancel.is_cancelled();
        result
    }

    fn count_sequential(&self, root: &Path, result: &mut FileCount) {
        let mut pending = vec![root.to_path_buf()];
        while let Some(path) = pending.pop() {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Some(mut subdirs) = self.count_level(&path, result) {
                subdirs.reverse();
                pending.append(&mut subdirs);
            }
        }
    }

    fn count_parallel(&self, path: &Path) -> FileCount {
        let mut result = FileCount::default();
        let Some(subdirs) = self.count_level(path, &mut result) else {
            return result;
        };
        subdirs
            .par_iter()
            .map(|subdir| self.count_parallel(subdir))
            .reduce(FileCount::default, FileCount::merge)
            .merge(result)
    }

    /// Count the files directly inside `path` and return its subdirectories.
    ///
    /// `None` when cancelled or when the directory cannot be listed.
    fn count_level(&self, path: &Path, result: &mut FileCount) -> Option<Vec<PathBuf>> {
        if self.cancel.is_cancelled() {
            debug!(path = %path.display(), "File count interrupted");
            return None;
        }

        let listing = match list_directory(path, self.include_hidden) {
            Ok(l) => l,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Skipping unreadable directory in count");
                result.errors.push(ScanWarning::from_scan_error(&err));
                return None;
            }
        };
        result.errors.extend(listing.skipped);

        let mut subdirs = Vec::new();
        for entry in listing.entries {
            match entry.kind {
                EntryKind::File => result.files += 1,
                EntryKind::Directory => subdirs.push(entry.path),
                EntryKind::SymlinkDirectory => {}
            }
            if self.cancel.is_cancelled() {
                return None;
            }
        }
        Some(subdirs)
    }
}
