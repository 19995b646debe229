//! Comparing the cache directory with the index.
//!
//! Downloads that crash half-way or index records lost with an old index
//! file leave files nobody references. [`crate::cache::ResourceCache::reconcile`]
//! finds them with a single-threaded [`walkdir`] pass and reports them; it
//! never deletes files it does not own.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{CacheError, CacheResult};

/// Outcome of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Regular files seen in the cache directory, excluding the index.
    pub scanned_files: usize,
    /// Files no record points at, sorted by path.
    pub orphaned: Vec<PathBuf>,
    /// Total size of the orphaned files.
    pub orphaned_bytes: u64,
    /// Keys whose record was purged because the file was gone.
    pub purged_missing: Vec<String>,
}

impl ReconcileReport {
    /// Whether the directory and the index agree.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.purged_missing.is_empty()
    }
}

/// The index database and its WAL/shared-memory side files.
fn is_index_file(path: &Path, index_file: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(index_file))
}

/// List the regular files under `dir` with their sizes.
///
/// Unreadable entries below the root are logged and skipped.
///
/// # Errors
///
/// Returns [`CacheError::Io`] if `dir` itself cannot be read.
pub(crate) fn scan_files(dir: &Path, index_file: &str) -> CacheResult<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory loop"));
                return Err(CacheError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
            Err(e) => {
                log::warn!("Skipping unreadable cache entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || is_index_file(entry.path(), index_file) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                log::warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        files.push((entry.into_path(), size));
    }
    Ok(files)
}
