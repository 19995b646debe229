//! Quota enforcement for the cache directory.
//!
//! # Overview
//!
//! The [`EvictionMonitor`] owns the byte counter for everything the cache
//! has on disk and the two quota knobs:
//!
//! - `max_dir_size_bytes`: the quota (default 10 GiB)
//! - `eviction_percentage`: how far below the quota a pass goes (default 25%)
//!
//! A pass only runs when usage is above the quota. It then removes
//! least-recently-touched entries until usage is at or below
//! `quota * (100 - eviction_percentage) / 100`. Going below the quota
//! keeps the next small write from immediately triggering another pass.
//!
//! Both knobs can be changed at any time. A change is picked up by the next
//! pass; nothing is evicted retroactively.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{CacheError, CacheResult};

/// Bytes per megabyte for the quota setting.
pub const BYTES_IN_MEGABYTE: u64 = 1024 * 1024;

/// Default quota: 10 GiB.
pub const DEFAULT_MAX_DIR_SIZE_MB: u64 = 10 * 1024;

/// Default share of the quota freed below the limit by each pass.
pub const DEFAULT_EVICTION_PERCENTAGE: u8 = 25;

/// Bytes currently held by cached product files.
///
/// Increased when a file is taken under management and decreased when the
/// last handle to it goes away. A file that cannot be deleted leaves
/// management too; it no longer counts against the quota and shows up as an
/// orphan in a reconcile pass.
#[derive(Debug, Default)]
pub struct DiskUsage {
    bytes: AtomicU64,
}

impl DiskUsage {
    /// Current usage in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn sub(&self, bytes: u64) {
        let _ = self
            .bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// An indexed entry as seen by an eviction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Entry key.
    pub key: String,
    /// Last read or write, in milliseconds since the epoch.
    pub last_touched_ms: u64,
    /// Insertion order, used to break ties deterministically.
    pub sequence: u64,
    /// Bytes freed by evicting this entry.
    pub size_bytes: u64,
    /// A caller still holds a handle to the file; it must not be removed.
    pub pinned: bool,
}

/// Summary of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Whether usage was above the quota when the pass started.
    pub triggered: bool,
    /// Quota in force during the pass.
    pub quota_bytes: u64,
    /// Usage the pass aimed for.
    pub target_bytes: u64,
    /// Usage before the pass.
    pub bytes_before: u64,
    /// Usage after the pass.
    pub bytes_after: u64,
    /// Keys removed, oldest first.
    pub evicted: Vec<String>,
    /// Evicted entries whose file could not be deleted.
    pub failed_deletes: usize,
    /// Entries skipped because a reader held them.
    pub skipped_pinned: usize,
}

impl EvictionReport {
    /// Bytes released by the pass.
    #[must_use]
    pub fn bytes_freed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Watches disk usage and picks entries to evict when the quota is exceeded.
#[derive(Debug)]
pub struct EvictionMonitor {
    max_dir_size_bytes: AtomicU64,
    eviction_percentage: AtomicU8,
    usage: Arc<DiskUsage>,
}

impl Default for EvictionMonitor {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_DIR_SIZE_MB * BYTES_IN_MEGABYTE,
            DEFAULT_EVICTION_PERCENTAGE,
        )
    }
}

impl EvictionMonitor {
    /// Create a monitor with a quota in bytes.
    ///
    /// Percentages above 100 are clamped to 100.
    #[must_use]
    pub fn new(max_dir_size_bytes: u64, eviction_percentage: u8) -> Self {
        Self {
            max_dir_size_bytes: AtomicU64::new(max_dir_size_bytes),
            eviction_percentage: AtomicU8::new(eviction_percentage.min(100)),
            usage: Arc::new(DiskUsage::default()),
        }
    }

    /// Shared usage counter.
    #[must_use]
    pub fn usage(&self) -> &Arc<DiskUsage> {
        &self.usage
    }

    /// Current usage in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.usage.bytes()
    }

    /// Quota in bytes.
    #[must_use]
    pub fn max_dir_size_bytes(&self) -> u64 {
        self.max_dir_size_bytes.load(Ordering::SeqCst)
    }

    /// Change the quota. Applies to the next pass.
    pub fn set_max_dir_size_bytes(&self, bytes: u64) {
        log::debug!("Setting max size for cache directory: {} bytes", bytes);
        self.max_dir_size_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Quota in whole megabytes.
    #[must_use]
    pub fn max_dir_size_mb(&self) -> u64 {
        self.max_dir_size_bytes() / BYTES_IN_MEGABYTE
    }

    /// Change the quota in megabytes. Applies to the next pass.
    pub fn set_max_dir_size_mb(&self, megabytes: u64) {
        self.set_max_dir_size_bytes(megabytes.saturating_mul(BYTES_IN_MEGABYTE));
    }

    /// Share of the quota freed below the limit by a pass.
    #[must_use]
    pub fn eviction_percentage(&self) -> u8 {
        self.eviction_percentage.load(Ordering::SeqCst)
    }

    /// Change the eviction percentage. Applies to the next pass.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidArgument`] for values above 100.
    pub fn set_eviction_percentage(&self, percentage: u8) -> CacheResult<()> {
        if percentage > 100 {
            return Err(CacheError::invalid(format!(
                "eviction percentage must be between 0 and 100, got {percentage}"
            )));
        }
        self.eviction_percentage.store(percentage, Ordering::SeqCst);
        Ok(())
    }

    /// Usage a pass brings the directory down to.
    #[must_use]
    pub fn target_bytes(&self) -> u64 {
        let quota = u128::from(self.max_dir_size_bytes());
        let keep = u128::from(100 - self.eviction_percentage());
        // quota * keep / 100 never exceeds quota, so it fits in u64.
        u64::try_from(quota * keep / 100).unwrap_or(u64::MAX)
    }

    /// Whether usage currently exceeds the quota.
    #[must_use]
    pub fn over_quota(&self) -> bool {
        self.used_bytes() > self.max_dir_size_bytes()
    }

    /// Choose which entries a pass removes, in removal order.
    ///
    /// Candidates are ranked by `last_touched_ms`, then by `sequence`.
    /// Pinned candidates are skipped. Returns an empty list when usage is
    /// within the quota.
    #[must_use]
    pub fn select_victims(&self, mut candidates: Vec<EvictionCandidate>) -> Vec<EvictionCandidate> {
        let used = self.used_bytes();
        let quota = self.max_dir_size_bytes();
        if used <= quota {
            return Vec::new();
        }

        let target = self.target_bytes();
        candidates.sort_by_key(|c| (c.last_touched_ms, c.sequence));

        let mut projected = used;
        let mut victims = Vec::new();
        for candidate in candidates {
            if projected <= target {
                break;
            }
            if candidate.pinned {
                log::debug!("Skipping eviction of {}: file is in use", candidate.key);
                continue;
            }
            projected = projected.saturating_sub(candidate.size_bytes);
            victims.push(candidate);
        }

        log::debug!(
            "Eviction pass selected {} entries (used {} B, quota {} B, target {} B)",
            victims.len(),
            used,
            quota,
            target
        );
        victims
    }
}
