//! The resource cache engine.
//!
//! # Overview
//!
//! [`ResourceCache`] owns the key → entry index and coordinates the other
//! cache components:
//!
//! - [`PendingRegistry`] deduplicates in-flight fetches
//! - [`ValidationPolicy`] decides whether an entry matches the latest metadata
//! - [`PersistenceProvider`] writes every index change through to disk
//! - [`EvictionMonitor`] keeps the directory under its byte quota
//!
//! # Typical flow
//!
//! ```no_run
//! use rescache::cache::{CacheOptions, CompletedResource, Fingerprint, ResourceCache};
//!
//! let cache = ResourceCache::open(CacheOptions::new("/var/cache/products")).unwrap();
//! let latest = Fingerprint::new(0x5eed);
//!
//! if let Some(product) = cache.get_valid("doc-42", Some(latest)).unwrap() {
//!     println!("cached at {}", product.path().display());
//! } else if cache.add_pending_cache_entry("doc-42", latest).unwrap().is_admitted() {
//!     let path = cache.product_path("doc-42").unwrap();
//!     // ... download into `path` ...
//!     let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
//!     cache
//!         .put(CompletedResource::new("doc-42", path, size, latest))
//!         .unwrap();
//! }
//! ```
//!
//! # Locking
//!
//! Two locks guard the engine: the pending set and the index. When both
//! are needed the pending lock is taken first. Product files are deleted
//! after the index lock is released.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::database::{SqlitePersistence, DEFAULT_INDEX_FILE};
use super::entry::{
    product_digest_of, product_file_name, product_key_digest, CacheEntry, CompletedResource,
    Fingerprint,
};
use super::eviction::{
    EvictionCandidate, EvictionMonitor, EvictionReport, BYTES_IN_MEGABYTE,
    DEFAULT_EVICTION_PERCENTAGE, DEFAULT_MAX_DIR_SIZE_MB,
};
use super::observer::{CacheObserver, CacheStats, RemovalCause, StatsCounters};
use super::pending::{Admission, PendingRegistry};
use super::persistence::PersistenceProvider;
use super::product::{CachedProduct, ProductFile, ProductStore};
use super::reconcile::{self, ReconcileReport};
use super::validation::{FingerprintPolicy, ValidationPolicy};
use crate::error::{CacheError, CacheResult};

/// Options for [`ResourceCache::open`].
#[derive(Clone)]
pub struct CacheOptions {
    /// Directory holding the product files and the index.
    pub cache_dir: PathBuf,
    /// Quota in bytes.
    pub max_dir_size_bytes: u64,
    /// Share of the quota freed below the limit by an eviction pass.
    pub eviction_percentage: u8,
    /// Name of the SQLite index file inside `cache_dir`.
    pub index_file: String,
    /// Run an eviction pass while opening if usage exceeds the quota.
    pub evict_on_open: bool,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    policy: Option<Arc<dyn ValidationPolicy>>,
    observers: Vec<Arc<dyn CacheObserver>>,
}

impl CacheOptions {
    /// Default options rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_dir_size_bytes: DEFAULT_MAX_DIR_SIZE_MB * BYTES_IN_MEGABYTE,
            eviction_percentage: DEFAULT_EVICTION_PERCENTAGE,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            evict_on_open: true,
            persistence: None,
            policy: None,
            observers: Vec::new(),
        }
    }

    /// Set the quota in megabytes.
    #[must_use]
    pub fn with_max_dir_size_mb(mut self, megabytes: u64) -> Self {
        self.max_dir_size_bytes = megabytes.saturating_mul(BYTES_IN_MEGABYTE);
        self
    }

    /// Set the quota in bytes.
    #[must_use]
    pub fn with_max_dir_size_bytes(mut self, bytes: u64) -> Self {
        self.max_dir_size_bytes = bytes;
        self
    }

    /// Set the eviction percentage (0-100).
    #[must_use]
    pub fn with_eviction_percentage(mut self, percentage: u8) -> Self {
        self.eviction_percentage = percentage;
        self
    }

    /// Set the index database file name.
    #[must_use]
    pub fn with_index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = name.into();
        self
    }

    /// Whether [`ResourceCache::open`] evicts right away when the recorded
    /// usage is over the quota.
    #[must_use]
    pub fn with_evict_on_open(mut self, evict: bool) -> Self {
        self.evict_on_open = evict;
        self
    }

    /// Use a custom persistence backend instead of the SQLite index.
    ///
    /// The provider is used as-is; it should already point at `cache_dir`.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Use a custom validation policy instead of fingerprint equality.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ValidationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register an observer from the start.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("cache_dir", &self.cache_dir)
            .field("max_dir_size_bytes", &self.max_dir_size_bytes)
            .field("eviction_percentage", &self.eviction_percentage)
            .field("index_file", &self.index_file)
            .field("evict_on_open", &self.evict_on_open)
            .field("custom_persistence", &self.persistence.is_some())
            .field("custom_policy", &self.policy.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Hands out strictly increasing millisecond stamps.
#[derive(Debug, Default)]
struct TouchClock {
    last_ms: AtomicU64,
}

impl TouchClock {
    fn next(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let step = |prev: u64| now.max(prev.saturating_add(1));
        let prev = self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(step(prev)))
            .unwrap_or_else(|prev| prev);
        step(prev)
    }

    fn observe(&self, ms: u64) {
        self.last_ms.fetch_max(ms, Ordering::SeqCst);
    }
}

struct Slot {
    entry: CacheEntry,
    file: Arc<ProductFile>,
    sequence: u64,
}

#[derive(Default)]
struct Index {
    slots: HashMap<String, Slot>,
    next_sequence: u64,
}

impl Index {
    fn insert(&mut self, entry: CacheEntry, file: Arc<ProductFile>) -> Option<Slot> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.slots.insert(
            entry.key.clone(),
            Slot {
                entry,
                file,
                sequence,
            },
        )
    }
}

/// An entry taken out of the index. Its file is released when dropped.
struct Removal {
    slot: Slot,
    cause: RemovalCause,
}

enum Lookup {
    Absent,
    Purged(Removal),
    Valid,
}

/// Disk-backed cache of downloaded resources.
///
/// All methods take `&self`; share the cache between threads with an `Arc`.
pub struct ResourceCache {
    cache_dir: RwLock<PathBuf>,
    index_file: String,
    persistence: Arc<dyn PersistenceProvider>,
    policy: Arc<dyn ValidationPolicy>,
    pending: PendingRegistry,
    index: Mutex<Index>,
    monitor: EvictionMonitor,
    files: Arc<ProductStore>,
    clock: TouchClock,
    fetches: AtomicU64,
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
    stats: StatsCounters,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("cache_dir", &*self.cache_dir.read())
            .field("entries", &self.len())
            .field("pending", &self.pending.len())
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

fn create_cache_dir(dir: &Path) -> CacheResult<()> {
    fs::create_dir_all(dir).map_err(|source| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn require_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        Err(CacheError::invalid("Must specify non-empty key"))
    } else {
        Ok(())
    }
}

impl ResourceCache {
    /// Open the cache, rebuilding the index from persisted records.
    ///
    /// Product files are not read or checked here; a record whose file is
    /// gone is purged the first time it is read. If the recorded usage is
    /// already above the quota, one eviction pass runs before returning
    /// unless [`CacheOptions::with_evict_on_open`] turned it off.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidArgument`] for an empty directory or a
    ///   percentage above 100
    /// - [`CacheError::Io`] if the directory cannot be created
    /// - [`CacheError::Persistence`] if the index cannot be opened or read
    pub fn open(options: CacheOptions) -> CacheResult<Self> {
        let CacheOptions {
            cache_dir,
            max_dir_size_bytes,
            eviction_percentage,
            index_file,
            evict_on_open,
            persistence,
            policy,
            observers,
        } = options;

        if cache_dir.as_os_str().is_empty() {
            return Err(CacheError::invalid("cache directory must not be empty"));
        }
        if eviction_percentage > 100 {
            return Err(CacheError::invalid(format!(
                "eviction percentage must be between 0 and 100, got {eviction_percentage}"
            )));
        }
        create_cache_dir(&cache_dir)?;

        let persistence: Arc<dyn PersistenceProvider> = match persistence {
            Some(persistence) => persistence,
            None => Arc::new(SqlitePersistence::open_with_name(&cache_dir, &index_file)?),
        };

        let monitor = EvictionMonitor::new(max_dir_size_bytes, eviction_percentage);
        let files = ProductStore::new(Arc::clone(monitor.usage()));
        let cache = Self {
            cache_dir: RwLock::new(cache_dir),
            index_file,
            persistence,
            policy: policy.unwrap_or_else(|| Arc::new(FingerprintPolicy)),
            pending: PendingRegistry::new(),
            index: Mutex::new(Index::default()),
            monitor,
            files,
            clock: TouchClock::default(),
            fetches: AtomicU64::new(u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)),
            observers: RwLock::new(observers),
            stats: StatsCounters::default(),
        };

        let records = cache.persistence.load_all()?;
        let index = cache.build_index(records);
        let count = index.slots.len();
        *cache.index.lock() = index;

        log::info!(
            "Opened resource cache at {} with {} entries ({} bytes)",
            cache.cache_directory().display(),
            count,
            cache.monitor.used_bytes()
        );

        if evict_on_open {
            cache.enforce_quota();
        }
        Ok(cache)
    }

    fn build_index(&self, mut records: Vec<CacheEntry>) -> Index {
        records.sort_by_key(|entry| entry.last_touched_ms);
        let mut index = Index::default();
        for entry in records {
            self.clock.observe(entry.last_touched_ms);
            let file = self.files.adopt(entry.file_path.clone(), entry.size_bytes);
            index.insert(entry, file);
        }
        index
    }

    // ------------------------------------------------------------------
    // Pending fetches
    // ------------------------------------------------------------------

    /// True if a fetch for `key` is in progress.
    ///
    /// Callers check this before starting a fetch so the same resource is
    /// not downloaded twice.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.is_pending(key)
    }

    /// Admit a fetch for `key` unless one is already pending or a valid
    /// entry is cached for fingerprint `latest`.
    ///
    /// The exclusion cases are not errors; they are reported through the
    /// returned [`Admission`]. Checking for a valid entry may purge a stale
    /// one as a side effect; observers hear about it after the pending lock
    /// is released. Concurrent calls for the same key admit exactly one
    /// caller.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidArgument`] for an empty key
    /// - [`CacheError::Persistence`] if purging a stale entry fails
    pub fn add_pending_cache_entry(&self, key: &str, latest: Fingerprint) -> CacheResult<Admission> {
        require_key(key)?;
        let mut purged = None;
        let admission = self.pending.admit_with(key, || {
            Ok::<_, CacheError>(match self.lookup(key, latest)? {
                Lookup::Valid => true,
                Lookup::Absent => false,
                Lookup::Purged(removal) => {
                    purged = Some(removal);
                    false
                }
            })
        });
        self.finish(purged.into_iter().collect());
        let admission = admission?;

        if admission.is_admitted() {
            StatsCounters::bump(&self.stats.admissions);
        } else {
            StatsCounters::bump(&self.stats.rejected_admissions);
        }
        Ok(admission)
    }

    /// Clear the pending marker for `key`, e.g. when a fetch is abandoned.
    ///
    /// Returns whether the key was pending. Removing a key that is not
    /// pending is a no-op.
    pub fn remove_pending_cache_entry(&self, key: &str) -> bool {
        self.pending.remove(key)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Make a completed download visible.
    ///
    /// Stamps the entry with the current time, writes it through to
    /// persistence, clears the pending marker and runs an eviction pass if
    /// the new file pushed usage over the quota. Once this returns, every
    /// thread observes the new entry.
    ///
    /// A previous entry for the same key is replaced; its file is deleted
    /// unless the new entry reuses the same path.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidArgument`] for an empty key, a product file
    ///   that does not exist or a path that is not valid UTF-8
    /// - [`CacheError::Persistence`] if the record cannot be written. The
    ///   index is unchanged and the key stays pending.
    pub fn put(&self, resource: CompletedResource) -> CacheResult<()> {
        log::trace!("ENTERING: put({})", resource.key);
        require_key(&resource.key)?;
        if !resource.file_path.is_file() {
            return Err(CacheError::invalid(format!(
                "product file does not exist: {}",
                resource.file_path.display()
            )));
        }
        if resource.file_path.to_str().is_none() {
            return Err(CacheError::invalid(format!(
                "product path is not valid UTF-8: {}",
                resource.file_path.display()
            )));
        }

        let entry = CacheEntry::from_completed(&resource, self.clock.next());
        let replaced = {
            let mut pending = self.pending.lock();
            let mut index = self.index.lock();
            self.persistence.put(&entry)?;

            let file = self.files.adopt(resource.file_path, resource.size_bytes);
            let replaced = index.insert(entry.clone(), file);
            PendingRegistry::remove_locked(&mut pending, &entry.key);
            replaced
        };

        if let Some(old) = replaced {
            // A reused path now belongs to the new file and is kept.
            old.file.doom();
            self.finish(vec![Removal {
                slot: old,
                cause: RemovalCause::Replaced,
            }]);
        }
        self.notify_added(&entry);

        self.enforce_quota();
        log::trace!("EXITING: put({})", entry.key);
        Ok(())
    }

    /// Remove `key` and delete its file.
    ///
    /// Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Persistence`] if the record cannot be removed.
    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        require_key(key)?;
        let removal = {
            let mut index = self.index.lock();
            self.purge_locked(&mut index, key, RemovalCause::Removed)?
        };
        let removed = removal.is_some();
        self.finish(removal.into_iter().collect());
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Return the cached resource for `key` if it matches `latest`.
    ///
    /// A stale entry (fingerprint mismatch) or one whose file has vanished
    /// is purged and reported as a miss. A hit refreshes the entry's
    /// last-touched time. The returned handle keeps the file on disk until
    /// it is dropped.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidArgument`] if `key` is empty or `latest` is
    ///   `None`
    /// - [`CacheError::Persistence`] if the purge or the touch cannot be
    ///   written
    pub fn get_valid(
        &self,
        key: &str,
        latest: Option<Fingerprint>,
    ) -> CacheResult<Option<CachedProduct>> {
        log::trace!("ENTERING: get_valid({})", key);
        require_key(key)?;
        let Some(latest) = latest else {
            return Err(CacheError::invalid("Must specify latest metadata fingerprint"));
        };

        let mut index = self.index.lock();
        match self.validate_locked(&mut index, key, latest)? {
            Lookup::Absent => {
                drop(index);
                StatsCounters::bump(&self.stats.misses);
                log::debug!("No product found in cache for key = {}", key);
                Ok(None)
            }
            Lookup::Purged(removal) => {
                drop(index);
                StatsCounters::bump(&self.stats.misses);
                self.finish(vec![removal]);
                Ok(None)
            }
            Lookup::Valid => {
                let touched = self.clock.next();
                let Some(slot) = index.slots.get_mut(key) else {
                    return Ok(None);
                };
                let mut entry = slot.entry.clone();
                entry.last_touched_ms = touched;
                self.persistence.put(&entry)?;
                slot.entry.last_touched_ms = touched;
                let product = CachedProduct::new(entry, Arc::clone(&slot.file));
                drop(index);

                StatsCounters::bump(&self.stats.hits);
                log::trace!("EXITING: get_valid({}) hit", key);
                Ok(Some(product))
            }
        }
    }

    /// Whether a valid entry for `key` is cached for fingerprint `latest`.
    ///
    /// Applies the same checks and purges as [`Self::get_valid`] but does
    /// not refresh the last-touched time. An empty key or missing
    /// fingerprint yields `false` rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Persistence`] if purging an invalid entry fails.
    pub fn contains_valid(&self, key: &str, latest: Option<Fingerprint>) -> CacheResult<bool> {
        match latest {
            Some(latest) if !key.is_empty() => self.contains_valid_inner(key, latest),
            _ => Ok(false),
        }
    }

    fn contains_valid_inner(&self, key: &str, latest: Fingerprint) -> CacheResult<bool> {
        Ok(match self.lookup(key, latest)? {
            Lookup::Valid => true,
            Lookup::Absent => false,
            Lookup::Purged(removal) => {
                self.finish(vec![removal]);
                false
            }
        })
    }

    /// Validate `key` under the index lock. A purged entry is handed back
    /// unfinished so the caller can release its own locks first.
    fn lookup(&self, key: &str, latest: Fingerprint) -> CacheResult<Lookup> {
        let mut index = self.index.lock();
        self.validate_locked(&mut index, key, latest)
    }

    /// Validate `key` against `latest`, purging it if it fails.
    fn validate_locked(
        &self,
        index: &mut Index,
        key: &str,
        latest: Fingerprint,
    ) -> CacheResult<Lookup> {
        let cause = match index.slots.get(key) {
            None => return Ok(Lookup::Absent),
            Some(slot) if !self.policy.is_current(&slot.entry, latest) => RemovalCause::Stale,
            Some(slot) if !slot.entry.has_product() => RemovalCause::MissingProduct,
            Some(_) => return Ok(Lookup::Valid),
        };
        Ok(self
            .purge_locked(index, key, cause)?
            .map_or(Lookup::Absent, Lookup::Purged))
    }

    /// Drop `key` from persistence and the index. The record is removed
    /// from persistence first so a failure leaves the index untouched.
    fn purge_locked(
        &self,
        index: &mut Index,
        key: &str,
        cause: RemovalCause,
    ) -> CacheResult<Option<Removal>> {
        if !index.slots.contains_key(key) {
            return Ok(None);
        }
        self.persistence.remove(key)?;
        let Some(slot) = index.slots.remove(key) else {
            return Ok(None);
        };
        slot.file.doom();
        self.stats.record_removal(cause);

        match cause {
            RemovalCause::Stale => log::debug!(
                "Entry found in cache was out-of-date or otherwise invalid, will need to be re-cached. Entry key: {}",
                key
            ),
            RemovalCause::MissingProduct => log::debug!(
                "Entry found in the cache, but no product found in cache directory for key = {}",
                key
            ),
            _ => log::debug!("Removed cache entry {} ({})", key, cause),
        }
        Ok(Some(Removal { slot, cause }))
    }

    /// Record of `key` without validation or touching.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.index.lock().slots.get(key).map(|slot| slot.entry.clone())
    }

    /// Snapshot of all entries, least recently touched first.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let index = self.index.lock();
        let mut slots: Vec<&Slot> = index.slots.values().collect();
        slots.sort_by_key(|slot| (slot.entry.last_touched_ms, slot.sequence));
        slots.into_iter().map(|slot| slot.entry.clone()).collect()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().slots.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// Run an eviction pass now.
    ///
    /// Does nothing while usage is within the quota. Otherwise removes
    /// least-recently-touched entries that no reader holds until usage is
    /// at or below the eviction target. Failures to delete a file or a
    /// record are logged and counted, never returned.
    pub fn enforce_quota(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let removals = {
            let mut index = self.index.lock();
            report.quota_bytes = self.monitor.max_dir_size_bytes();
            report.target_bytes = self.monitor.target_bytes();
            report.bytes_before = self.monitor.used_bytes();
            if !self.monitor.over_quota() {
                report.bytes_after = report.bytes_before;
                return report;
            }
            report.triggered = true;

            let candidates: Vec<EvictionCandidate> = index
                .slots
                .values()
                .map(|slot| EvictionCandidate {
                    key: slot.entry.key.clone(),
                    last_touched_ms: slot.entry.last_touched_ms,
                    sequence: slot.sequence,
                    size_bytes: slot.entry.size_bytes,
                    pinned: ProductFile::is_pinned(&slot.file),
                })
                .collect();
            report.skipped_pinned = candidates.iter().filter(|c| c.pinned).count();

            let mut removals = Vec::new();
            for victim in self.monitor.select_victims(candidates) {
                if let Err(e) = self.persistence.remove(&victim.key) {
                    log::warn!(
                        "Failed to remove index record for evicted entry {}: {}",
                        victim.key,
                        e
                    );
                }
                if let Some(slot) = index.slots.remove(&victim.key) {
                    slot.file.doom();
                    self.stats.record_removal(RemovalCause::Evicted);
                    report.evicted.push(victim.key);
                    removals.push(Removal {
                        slot,
                        cause: RemovalCause::Evicted,
                    });
                }
            }
            removals
        };

        let paths: Vec<PathBuf> = removals
            .iter()
            .map(|removal| removal.slot.file.path().to_path_buf())
            .collect();
        self.finish(removals);

        report.failed_deletes = paths.iter().filter(|path| path.exists()).count();
        report.bytes_after = self.monitor.used_bytes();
        if report.failed_deletes > 0 {
            log::warn!(
                "Eviction could not delete {} file(s) from {}",
                report.failed_deletes,
                self.cache_directory().display()
            );
        }
        log::info!(
            "Eviction pass removed {} entries, usage {} -> {} bytes (quota {}, target {})",
            report.evicted.len(),
            report.bytes_before,
            report.bytes_after,
            report.quota_bytes,
            report.target_bytes
        );
        report
    }

    /// Quota in whole megabytes.
    #[must_use]
    pub fn max_dir_size_mb(&self) -> u64 {
        self.monitor.max_dir_size_mb()
    }

    /// Change the quota. Takes effect on the next eviction pass.
    pub fn set_max_dir_size_mb(&self, megabytes: u64) {
        self.monitor.set_max_dir_size_mb(megabytes);
    }

    /// Quota in bytes.
    #[must_use]
    pub fn max_dir_size_bytes(&self) -> u64 {
        self.monitor.max_dir_size_bytes()
    }

    /// Change the quota in bytes. Takes effect on the next eviction pass.
    pub fn set_max_dir_size_bytes(&self, bytes: u64) {
        self.monitor.set_max_dir_size_bytes(bytes);
    }

    /// Share of the quota an eviction pass frees below the limit.
    #[must_use]
    pub fn eviction_percentage(&self) -> u8 {
        self.monitor.eviction_percentage()
    }

    /// Change the eviction percentage. Takes effect on the next pass.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidArgument`] for values above 100.
    pub fn set_eviction_percentage(&self, percentage: u8) -> CacheResult<()> {
        self.monitor.set_eviction_percentage(percentage)
    }

    /// Usage an eviction pass shrinks the cache to.
    #[must_use]
    pub fn eviction_target_bytes(&self) -> u64 {
        self.monitor.target_bytes()
    }

    /// Bytes held by cached files.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.monitor.used_bytes()
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    /// Current cache directory.
    #[must_use]
    pub fn cache_directory(&self) -> PathBuf {
        self.cache_dir.read().clone()
    }

    /// A fresh location for a downloader to write the bytes of `key` to.
    ///
    /// Every call returns a path that no file and no live entry uses, so a
    /// new fetch never overwrites a file that an older entry or a reader
    /// still holds. Abandoned paths are reported by [`Self::reconcile`] once
    /// the key is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidArgument`] for an empty key.
    pub fn product_path(&self, key: &str) -> CacheResult<PathBuf> {
        require_key(key)?;
        let dir = self.cache_dir.read();
        loop {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst);
            let path = dir.join(product_file_name(key, fetch));
            if !path.exists() && !self.files.is_claimed(&path) {
                return Ok(path);
            }
        }
    }

    /// Switch to a different cache directory.
    ///
    /// An empty path is rejected as a logged no-op and `Ok(false)` is
    /// returned. Otherwise the directory is created, persistence is
    /// re-pointed at it and the index is rebuilt from the records found
    /// there. Files in the previous directory are left in place. Pending
    /// markers are keyed by resource, not path, and are kept.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Io`] if the directory cannot be created
    /// - [`CacheError::Persistence`] if the index there cannot be opened
    pub fn set_cache_directory(&self, dir: impl AsRef<Path>) -> CacheResult<bool> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            log::debug!(
                "Invalid product directory, keeping: {}",
                self.cache_directory().display()
            );
            return Ok(false);
        }
        create_cache_dir(dir)?;

        let previous = {
            let mut index = self.index.lock();
            let old_dir = self.cache_directory();
            self.persistence.relocate(dir)?;
            let records = match self.persistence.load_all() {
                Ok(records) => records,
                Err(e) => {
                    if let Err(back) = self.persistence.relocate(&old_dir) {
                        log::warn!(
                            "Could not restore cache index at {}: {}",
                            old_dir.display(),
                            back
                        );
                    }
                    return Err(e.into());
                }
            };
            let fresh = self.build_index(records);
            *self.cache_dir.write() = dir.to_path_buf();
            std::mem::replace(&mut *index, fresh)
        };
        drop(previous);

        log::info!("Set product cache directory to: {}", dir.display());
        self.enforce_quota();
        Ok(true)
    }

    /// Compare the directory contents with the index.
    ///
    /// Records whose file is gone are purged. Files that no record points
    /// at are reported but left alone, including files an eviction pass
    /// failed to delete. Product files of a pending key are treated as
    /// in-flight downloads, not orphans.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Io`] if the directory cannot be walked
    /// - [`CacheError::Persistence`] if a purge cannot be written
    pub fn reconcile(&self) -> CacheResult<ReconcileReport> {
        let dir = self.cache_directory();
        let files = reconcile::scan_files(&dir, &self.index_file)?;
        let in_flight: HashSet<String> = self
            .pending
            .keys()
            .iter()
            .map(|key| product_key_digest(key))
            .collect();
        let is_in_flight = |path: &Path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(product_digest_of)
                .is_some_and(|digest| in_flight.contains(digest))
        };

        let mut removals = Vec::new();
        let referenced: HashSet<PathBuf> = {
            let mut index = self.index.lock();
            let missing: Vec<String> = index
                .slots
                .values()
                .filter(|slot| !slot.entry.has_product())
                .map(|slot| slot.entry.key.clone())
                .collect();
            for key in &missing {
                if let Some(removal) =
                    self.purge_locked(&mut index, key, RemovalCause::MissingProduct)?
                {
                    removals.push(removal);
                }
            }
            index
                .slots
                .values()
                .map(|slot| slot.entry.file_path.clone())
                .collect()
        };

        let mut report = ReconcileReport {
            scanned_files: files.len(),
            purged_missing: removals.iter().map(|r| r.slot.entry.key.clone()).collect(),
            ..ReconcileReport::default()
        };
        self.finish(removals);

        for (path, size) in files {
            if referenced.contains(&path) || is_in_flight(&path) {
                continue;
            }
            report.orphaned_bytes += size;
            report.orphaned.push(path);
        }
        report.orphaned.sort();

        log::info!(
            "Reconciled {}: {} files, {} orphaned, {} records purged",
            dir.display(),
            report.scanned_files,
            report.orphaned.len(),
            report.purged_missing.len()
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register an observer for entry additions and removals.
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.observers.write().push(observer);
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            pending: self.pending.len(),
            used_bytes: self.monitor.used_bytes(),
            max_dir_size_bytes: self.monitor.max_dir_size_bytes(),
            ..self.stats.snapshot()
        }
    }

    fn notify_added(&self, entry: &CacheEntry) {
        for observer in self.observers.read().iter() {
            observer.entry_added(entry);
        }
    }

    /// Tell observers about removed entries, then release their files.
    fn finish(&self, removals: Vec<Removal>) {
        if removals.is_empty() {
            return;
        }
        {
            let observers = self.observers.read();
            for removal in &removals {
                for observer in observers.iter() {
                    observer.entry_removed(&removal.slot.entry, removal.cause);
                }
            }
        }
        drop(removals);
    }
}
