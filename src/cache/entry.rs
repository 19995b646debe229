//! Cache entry definitions.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Summary of a resource's metadata at the time its bytes were cached.
///
/// Two fingerprints are equal exactly when the cached bytes can be reused.
/// Callers either supply their own value or derive one with
/// [`Fingerprint::of_metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Wrap a caller-computed fingerprint value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw fingerprint value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Derive a fingerprint from serializable metadata.
    ///
    /// The metadata is rendered as JSON and hashed with SHA-256; the first
    /// eight bytes of the digest form the fingerprint. The result is stable
    /// across processes and platforms, unlike `std::hash::Hash`.
    ///
    /// Map-valued fields should use an ordered map (`BTreeMap`) so that equal
    /// metadata always serializes identically.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the metadata cannot be rendered as JSON.
    pub fn of_metadata<T: Serialize + ?Sized>(metadata: &T) -> serde_json::Result<Self> {
        let json = serde_json::to_vec(metadata)?;
        let digest = Sha256::digest(&json);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Ok(Self(u64::from_be_bytes(prefix)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A finished download handed over by the downloader.
///
/// The file at `file_path` must be complete before it is passed to
/// [`crate::cache::ResourceCache::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResource {
    /// Stable resource identifier.
    pub key: String,
    /// Location of the downloaded bytes.
    pub file_path: PathBuf,
    /// Size of the downloaded file in bytes.
    pub size_bytes: u64,
    /// Fingerprint of the metadata the bytes were fetched for.
    pub fingerprint: Fingerprint,
}

impl CompletedResource {
    /// Create a completed resource description.
    pub fn new(
        key: impl Into<String>,
        file_path: impl Into<PathBuf>,
        size_bytes: u64,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            key: key.into(),
            file_path: file_path.into(),
            size_bytes,
            fingerprint,
        }
    }
}

/// Record kept for every cached resource.
///
/// This is exactly what the persistence layer stores; reconstructing the
/// index after a restart never requires reading file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Stable resource identifier.
    pub key: String,
    /// Metadata fingerprint at cache time.
    pub fingerprint: Fingerprint,
    /// Location of the cached bytes.
    pub file_path: PathBuf,
    /// Size of the cached file, used for quota accounting.
    pub size_bytes: u64,
    /// Milliseconds since the Unix epoch of the last read or write.
    pub last_touched_ms: u64,
}

impl CacheEntry {
    /// Build an entry for a completed download, stamped with `touched_ms`.
    #[must_use]
    pub fn from_completed(resource: &CompletedResource, touched_ms: u64) -> Self {
        Self {
            key: resource.key.clone(),
            fingerprint: resource.fingerprint,
            file_path: resource.file_path.clone(),
            size_bytes: resource.size_bytes,
            last_touched_ms: touched_ms,
        }
    }

    /// Whether the backing file is present on disk.
    ///
    /// The cache directory may be modified externally, so a record can
    /// outlive its file.
    #[must_use]
    pub fn has_product(&self) -> bool {
        self.file_path.is_file()
    }

    /// Last touch time as a UTC timestamp.
    #[must_use]
    pub fn last_touched_at(&self) -> DateTime<Utc> {
        i64::try_from(self.last_touched_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Path of the cached bytes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Digest shared by every product file name of `key`.
pub(crate) fn product_key_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// File name for fetch number `fetch` of `key`, safe on every platform.
pub(crate) fn product_file_name(key: &str, fetch: u64) -> String {
    format!("{}.{fetch:016x}", product_key_digest(key))
}

/// The key digest a product file name was built from.
pub(crate) fn product_digest_of(file_name: &str) -> Option<&str> {
    let (digest, fetch) = file_name.split_once('.')?;
    (digest.len() == 64 && fetch.len() == 16).then_some(digest)
}
