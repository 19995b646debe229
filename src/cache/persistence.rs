//! Durable key → entry storage.
//!
//! A [`PersistenceProvider`] only stores [`CacheEntry`] records. It never
//! creates or deletes the product files those records point at, and it has
//! no policy of its own: admission, validation and eviction all live in the
//! engine. Any key-value backend can sit behind this trait.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::entry::CacheEntry;

/// Errors raised by a persistence backend.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    /// The SQLite index failed.
    #[error("index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The backing location could not be prepared.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A stored record could not be turned back into an entry.
    #[error("corrupt record for key {key}: {reason}")]
    Corrupt {
        /// Key of the unreadable record
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Storage substrate for cache entry records.
///
/// Every operation must be idempotent: putting the same record twice or
/// removing a key that is not stored succeeds without effect.
pub trait PersistenceProvider: Send + Sync {
    /// Fetch the record stored under `key`.
    fn get(&self, key: &str) -> PersistenceResult<Option<CacheEntry>>;

    /// Insert or replace the record for `entry.key`.
    fn put(&self, entry: &CacheEntry) -> PersistenceResult<()>;

    /// Remove the record stored under `key`. Returns whether one existed.
    fn remove(&self, key: &str) -> PersistenceResult<bool>;

    /// All stored records, used to rebuild the index after a restart.
    fn load_all(&self) -> PersistenceResult<Vec<CacheEntry>>;

    /// Re-point the store at a different cache directory.
    fn relocate(&self, dir: &Path) -> PersistenceResult<()>;
}

/// In-process provider that keeps one record map per directory.
///
/// Records survive [`PersistenceProvider::relocate`] round trips within the
/// same process but not a restart. Useful for tests and for deployments
/// where an external replication layer is the durable copy.
#[derive(Debug)]
pub struct MemoryPersistence {
    inner: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    current: PathBuf,
    stores: HashMap<PathBuf, HashMap<String, CacheEntry>>,
}

impl MemoryState {
    fn records(&mut self) -> &mut HashMap<String, CacheEntry> {
        self.stores.entry(self.current.clone()).or_default()
    }
}

impl MemoryPersistence {
    /// Create an empty store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                current: dir.into(),
                stores: HashMap::new(),
            }),
        }
    }

    /// Number of records stored for the current directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records().len()
    }

    /// Whether the current directory has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceProvider for MemoryPersistence {
    fn get(&self, key: &str) -> PersistenceResult<Option<CacheEntry>> {
        Ok(self.inner.lock().records().get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> PersistenceResult<()> {
        self.inner
            .lock()
            .records()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistenceResult<bool> {
        Ok(self.inner.lock().records().remove(key).is_some())
    }

    fn load_all(&self) -> PersistenceResult<Vec<CacheEntry>> {
        Ok(self.inner.lock().records().values().cloned().collect())
    }

    fn relocate(&self, dir: &Path) -> PersistenceResult<()> {
        self.inner.lock().current = dir.to_path_buf();
        Ok(())
    }
}
