//! Disk-backed resource cache.
//!
//! Downloaded resources are stored as files in a cache directory and indexed
//! by key. Each entry carries the [`Fingerprint`] of the metadata it was
//! downloaded under; a read with a different fingerprint purges the entry.
//!
//! # Architecture
//!
//! * [`engine`]: [`ResourceCache`], the entry point tying everything together.
//! * [`entry`]: Entry records, completed downloads and fingerprints.
//! * [`pending`]: Deduplication of in-flight fetches.
//! * [`validation`]: Freshness policy.
//! * [`eviction`]: Byte quota and least-recently-touched victim selection.
//! * [`persistence`] / [`database`]: Write-through storage of the index, in
//!   memory or in SQLite.
//! * [`observer`]: Change notifications and statistics.
//! * [`reconcile`]: Directory/index consistency checks.
//!
//! # Durability
//!
//! Every index change is written through to persistence before it becomes
//! visible. On restart the index is rebuilt from the persisted records and
//! usage is re-derived from their sizes.

pub mod database;
pub mod engine;
pub mod entry;
pub mod eviction;
pub mod observer;
pub mod pending;
pub mod persistence;
mod product;
pub mod reconcile;
pub mod validation;

pub use database::{SqlitePersistence, DEFAULT_INDEX_FILE};
pub use engine::{CacheOptions, ResourceCache};
pub use entry::{CacheEntry, CompletedResource, Fingerprint};
pub use eviction::{
    DiskUsage, EvictionCandidate, EvictionMonitor, EvictionReport, BYTES_IN_MEGABYTE,
    DEFAULT_EVICTION_PERCENTAGE, DEFAULT_MAX_DIR_SIZE_MB,
};
pub use observer::{CacheObserver, CacheStats, RemovalCause};
pub use pending::{Admission, PendingRegistry};
pub use persistence::{
    MemoryPersistence, PersistenceError, PersistenceProvider, PersistenceResult,
};
pub use product::CachedProduct;
pub use reconcile::ReconcileReport;
pub use validation::{FingerprintPolicy, ValidationPolicy};
