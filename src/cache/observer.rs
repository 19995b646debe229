//! Entry change notifications and counters.
//!
//! [`CacheObserver`] is the hook an external replication layer uses to
//! mirror entry metadata to other nodes; it is also how tests and operators
//! tell the different removal causes apart.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::CacheEntry;

/// Why an entry left the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalCause {
    /// Fingerprint no longer matches the latest metadata. File deleted.
    Stale,
    /// The record outlived its product file.
    MissingProduct,
    /// Removed by an eviction pass to get back under the quota.
    Evicted,
    /// Overwritten by a newer `put` for the same key.
    Replaced,
    /// Removed on request.
    Removed,
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stale => "stale",
            Self::MissingProduct => "missing-product",
            Self::Evicted => "evicted",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Receives index changes after they are applied.
///
/// Callbacks run on the thread that made the change, after the cache has
/// released its pending and index locks, so they may call back into the
/// cache. They must not block for long.
pub trait CacheObserver: Send + Sync {
    /// `entry` became visible.
    fn entry_added(&self, entry: &CacheEntry) {
        let _ = entry;
    }

    /// `entry` left the index for `cause`.
    fn entry_removed(&self, entry: &CacheEntry, cause: RemovalCause) {
        let _ = (entry, cause);
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a valid entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries purged because their fingerprint changed.
    pub stale_purges: u64,
    /// Entries purged because their file was gone.
    pub missing_product_purges: u64,
    /// Entries removed by eviction passes.
    pub evictions: u64,
    /// Fetches admitted as pending.
    pub admissions: u64,
    /// Admission requests turned away (already pending or cached).
    pub rejected_admissions: u64,
    /// Entries in the index.
    pub entries: usize,
    /// Keys currently pending.
    pub pending: usize,
    /// Bytes held by cached files.
    pub used_bytes: u64,
    /// Quota in bytes.
    pub max_dir_size_bytes: u64,
}

impl CacheStats {
    /// Share of reads that were hits, in percent.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            (self.hits as f64 / reads as f64) * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) stale_purges: AtomicU64,
    pub(crate) missing_product_purges: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) admissions: AtomicU64,
    pub(crate) rejected_admissions: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removal(&self, cause: RemovalCause) {
        match cause {
            RemovalCause::Stale => Self::bump(&self.stale_purges),
            RemovalCause::MissingProduct => Self::bump(&self.missing_product_purges),
            RemovalCause::Evicted => Self::bump(&self.evictions),
            RemovalCause::Replaced | RemovalCause::Removed => {}
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_purges: self.stale_purges.load(Ordering::Relaxed),
            missing_product_purges: self.missing_product_purges.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            rejected_admissions: self.rejected_admissions.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
