//! Freshness checks for cached entries.
//!
//! A policy only answers whether an entry still matches the latest metadata.
//! It never touches the index or the disk: when an entry is not current the
//! engine purges it explicitly (see [`crate::cache::RemovalCause::Stale`]).

use super::entry::{CacheEntry, Fingerprint};

/// Decides whether a cached entry is still valid.
pub trait ValidationPolicy: Send + Sync {
    /// Whether `entry` can be served to a caller whose latest metadata has
    /// fingerprint `latest`.
    fn is_current(&self, entry: &CacheEntry, latest: Fingerprint) -> bool;
}

/// Valid iff the stored fingerprint equals the latest one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintPolicy;

impl ValidationPolicy for FingerprintPolicy {
    fn is_current(&self, entry: &CacheEntry, latest: Fingerprint) -> bool {
        let current = entry.fingerprint == latest;
        if !current {
            log::trace!(
                "Fingerprint mismatch for {}: cached {} latest {}",
                entry.key,
                entry.fingerprint,
                latest
            );
        }
        current
    }
}

impl<F> ValidationPolicy for F
where
    F: Fn(&CacheEntry, Fingerprint) -> bool + Send + Sync,
{
    fn is_current(&self, entry: &CacheEntry, latest: Fingerprint) -> bool {
        self(entry, latest)
    }
}
