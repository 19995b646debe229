//! Tracking of in-flight fetches.
//!
//! A key is *pending* from the moment a fetch is admitted until the finished
//! resource is `put` or the caller abandons the fetch. Admission is a single
//! critical section: the "already pending?" test, the caller's "already
//! cached?" check and the insert all run under one lock, so two racing
//! callers can never both be admitted for the same key.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;

/// Outcome of [`PendingRegistry::admit_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key is now pending; the caller owns the fetch.
    Admitted,
    /// Another caller is already fetching this key.
    AlreadyPending,
    /// A valid cached entry exists; nothing to fetch.
    AlreadyCached,
}

impl Admission {
    /// Whether the caller should start a fetch.
    #[must_use]
    pub fn is_admitted(self) -> bool {
        self == Self::Admitted
    }
}

/// Set of keys whose fetch is in progress.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    keys: Mutex<HashSet<String>>,
}

impl PendingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff a fetch for `key` has been admitted and not yet completed or
    /// abandoned.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    /// Admit `key` unless it is already pending or `is_cached` reports a
    /// valid cached entry.
    ///
    /// `is_cached` runs while the registry lock is held. It must not call
    /// back into this registry.
    pub fn admit_with<E>(
        &self,
        key: &str,
        is_cached: impl FnOnce() -> Result<bool, E>,
    ) -> Result<Admission, E> {
        let mut keys = self.keys.lock();
        if keys.contains(key) {
            log::debug!("Cache entry with key = {} is already pending", key);
            return Ok(Admission::AlreadyPending);
        }
        if is_cached()? {
            log::debug!("Cache entry with key = {} is already in cache", key);
            return Ok(Admission::AlreadyCached);
        }
        keys.insert(key.to_string());
        log::debug!("Admitted pending cache entry with key = {}", key);
        Ok(Admission::Admitted)
    }

    /// Clear the pending marker for `key`. Returns whether it was pending.
    pub fn remove(&self, key: &str) -> bool {
        Self::remove_locked(&mut self.keys.lock(), key)
    }

    /// Number of keys currently pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether no fetch is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the pending keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Hold the registry lock so index updates can be made atomically with
    /// respect to admission.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock()
    }

    pub(crate) fn remove_locked(keys: &mut HashSet<String>, key: &str) -> bool {
        let removed = keys.remove(key);
        if removed {
            log::debug!("Removed pending cache entry with key = {}", key);
        } else {
            log::debug!("Did not find pending cache entry with key = {}", key);
        }
        removed
    }
}
