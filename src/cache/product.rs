//! Ownership of cached product files.
//!
//! Each indexed entry owns its file through an `Arc<ProductFile>`. Readers
//! get a clone of that `Arc` inside a [`CachedProduct`], which pins the file:
//! eviction skips pinned entries, and an entry purged while pinned has its
//! file deleted only when the last handle is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::entry::{CacheEntry, Fingerprint};
use super::eviction::DiskUsage;

/// Bookkeeping shared by every [`ProductFile`] of one cache.
///
/// A path is claimed by the file most recently adopted at it. A doomed file
/// deletes its path only while it still holds the claim, so an old handle
/// never removes bytes a newer entry wrote to the same location.
#[derive(Debug)]
pub(crate) struct ProductStore {
    usage: Arc<DiskUsage>,
    claims: Mutex<HashMap<PathBuf, u64>>,
    next_claim: AtomicU64,
}

impl ProductStore {
    pub(crate) fn new(usage: Arc<DiskUsage>) -> Arc<Self> {
        Arc::new(Self {
            usage,
            claims: Mutex::new(HashMap::new()),
            next_claim: AtomicU64::new(0),
        })
    }

    /// Take `path` under management and count its bytes.
    pub(crate) fn adopt(self: &Arc<Self>, path: PathBuf, size_bytes: u64) -> Arc<ProductFile> {
        let claim = self.next_claim.fetch_add(1, Ordering::SeqCst);
        self.claims.lock().insert(path.clone(), claim);
        self.usage.add(size_bytes);
        Arc::new(ProductFile {
            path,
            size_bytes,
            claim,
            doomed: AtomicBool::new(false),
            store: Arc::clone(self),
        })
    }

    /// Whether a live file, indexed or held by a reader, owns `path`.
    pub(crate) fn is_claimed(&self, path: &Path) -> bool {
        self.claims.lock().contains_key(path)
    }

    /// Give up `file`'s claim and uncount its bytes, deleting it if doomed.
    ///
    /// The claims lock is held across the delete so a new adoption at the
    /// same path cannot slip in between the ownership check and the unlink.
    fn release(&self, file: &ProductFile) {
        let mut claims = self.claims.lock();
        let owner = claims.get(&file.path) == Some(&file.claim);
        if owner {
            claims.remove(&file.path);
        }

        if file.doomed.load(Ordering::SeqCst) {
            if !owner {
                log::trace!(
                    "Leaving {} in place, a newer entry owns it",
                    file.path.display()
                );
            } else {
                match fs::remove_file(&file.path) {
                    Ok(()) => log::trace!("Deleted cached file {}", file.path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        // No record refers to it any more; reconcile reports it.
                        log::warn!(
                            "File was not removed from cache directory: {}: {}",
                            file.path.display(),
                            e
                        );
                    }
                }
            }
        }
        drop(claims);
        self.usage.sub(file.size_bytes);
    }
}

/// A file under cache management.
#[derive(Debug)]
pub(crate) struct ProductFile {
    path: PathBuf,
    size_bytes: u64,
    claim: u64,
    doomed: AtomicBool,
    store: Arc<ProductStore>,
}

impl ProductFile {
    /// Delete the file once the last handle goes away.
    pub(crate) fn doom(&self) {
        self.doomed.store(true, Ordering::SeqCst);
    }

    /// Whether anything besides the index holds this file.
    pub(crate) fn is_pinned(this: &Arc<Self>) -> bool {
        Arc::strong_count(this) > 1
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProductFile {
    fn drop(&mut self) {
        self.store.release(self);
    }
}

/// A valid cached resource returned by [`crate::cache::ResourceCache::get_valid`].
///
/// While this handle is alive the backing file is not evicted, and it is not
/// deleted even if the entry is invalidated in the meantime.
#[derive(Debug, Clone)]
pub struct CachedProduct {
    entry: CacheEntry,
    file: Arc<ProductFile>,
}

impl CachedProduct {
    pub(crate) fn new(entry: CacheEntry, file: Arc<ProductFile>) -> Self {
        Self { entry, file }
    }

    /// Resource key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Snapshot of the entry at the time it was read.
    #[must_use]
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// Location of the cached bytes.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size of the cached file in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.entry.size_bytes
    }

    /// Fingerprint the bytes were cached under.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.entry.fingerprint
    }

    /// Open the cached file for reading.
    pub fn open(&self) -> io::Result<File> {
        File::open(self.file.path())
    }

    /// Read the whole cached file into memory.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(self.file.path())
    }
}
