use rescache::cache::{CacheOptions, CompletedResource, Fingerprint, ResourceCache};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const FP: Fingerprint = Fingerprint::new(7);

/// Quota and sizes are scaled from megabytes to bytes.
fn open_cache(dir: &Path, quota: u64, percentage: u8) -> ResourceCache {
    let options = CacheOptions::new(dir)
        .with_max_dir_size_bytes(quota)
        .with_eviction_percentage(percentage);
    ResourceCache::open(options).unwrap()
}

fn put_sized(cache: &ResourceCache, key: &str, size: usize) -> PathBuf {
    let path = cache.product_path(key).unwrap();
    fs::write(&path, vec![0u8; size]).unwrap();
    cache
        .put(CompletedResource::new(key, &path, size as u64, FP))
        .unwrap();
    path
}

fn keys(cache: &ResourceCache) -> Vec<String> {
    cache.entries().into_iter().map(|entry| entry.key).collect()
}

#[test]
fn test_three_inserts_over_quota_leave_only_newest() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 25);

    let a = put_sized(&cache, "A", 40);
    let b = put_sized(&cache, "B", 40);
    assert_eq!(cache.used_bytes(), 80);

    let c = put_sized(&cache, "C", 40);
    assert_eq!(keys(&cache), vec!["C"]);
    assert_eq!(cache.used_bytes(), 40);
    assert!(!a.exists());
    assert!(!b.exists());
    assert!(c.exists());
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn test_read_protects_entry_from_eviction() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 25);

    put_sized(&cache, "A", 30);
    put_sized(&cache, "B", 30);
    put_sized(&cache, "C", 30);
    // A becomes the most recently touched entry.
    drop(cache.get_valid("A", Some(FP)).unwrap().unwrap());

    put_sized(&cache, "D", 30);
    assert_eq!(keys(&cache), vec!["A", "D"]);
    assert!(cache.used_bytes() <= 75);
}

#[test]
fn test_pinned_entry_is_skipped() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 25);

    put_sized(&cache, "A", 40);
    let reader = cache.get_valid("A", Some(FP)).unwrap().unwrap();
    put_sized(&cache, "B", 40);
    put_sized(&cache, "C", 40);

    // A is the oldest entry but a reader holds it, so B and then C go.
    assert!(cache.peek("A").is_some());
    assert!(reader.path().exists());
    assert!(cache.peek("B").is_none());
    assert!(cache.peek("C").is_none());
    assert_eq!(cache.used_bytes(), 40);
    drop(reader);

    let report = cache.enforce_quota();
    assert!(!report.triggered);
}

#[test]
fn test_enforce_quota_after_lowering_limit() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 1_000, 50);
    for key in ["a", "b", "c", "d"] {
        put_sized(&cache, key, 100);
    }
    assert_eq!(cache.used_bytes(), 400);

    cache.set_max_dir_size_bytes(300);
    // Nothing happens until the next pass.
    assert_eq!(cache.len(), 4);

    let report = cache.enforce_quota();
    assert!(report.triggered);
    assert_eq!(report.quota_bytes, 300);
    assert_eq!(report.target_bytes, 150);
    assert_eq!(report.evicted, vec!["a", "b", "c"]);
    assert_eq!(report.bytes_before, 400);
    assert_eq!(report.bytes_after, 100);
    assert_eq!(report.bytes_freed(), 300);
    assert_eq!(report.failed_deletes, 0);
    assert_eq!(keys(&cache), vec!["d"]);
}

#[test]
fn test_zero_percentage_evicts_to_quota() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 0);

    put_sized(&cache, "a", 60);
    put_sized(&cache, "b", 30);
    put_sized(&cache, "c", 30);

    assert_eq!(keys(&cache), vec!["b", "c"]);
    assert_eq!(cache.used_bytes(), 60);
}

#[test]
fn test_runtime_settings() {
    let dir = tempdir().unwrap();
    let cache = ResourceCache::open(CacheOptions::new(dir.path())).unwrap();

    assert_eq!(cache.max_dir_size_mb(), 10240);
    assert_eq!(cache.eviction_percentage(), 25);

    cache.set_max_dir_size_mb(2);
    assert_eq!(cache.max_dir_size_bytes(), 2 * 1024 * 1024);
    assert_eq!(cache.eviction_target_bytes(), 3 * 1024 * 1024 / 2);

    cache.set_eviction_percentage(60).unwrap();
    assert_eq!(cache.eviction_percentage(), 60);
    assert!(cache.set_eviction_percentage(101).is_err());
    assert_eq!(cache.eviction_percentage(), 60);
}

#[test]
fn test_within_quota_pass_is_noop() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 25);
    put_sized(&cache, "a", 50);

    let report = cache.enforce_quota();
    assert!(!report.triggered);
    assert!(report.evicted.is_empty());
    assert_eq!(report.bytes_before, 50);
    assert_eq!(report.bytes_after, 50);
}

#[test]
fn test_undeletable_file_drops_record_and_stops_counting() {
    let dir = tempdir().unwrap();
    let cache = open_cache(dir.path(), 100, 25);
    let a = put_sized(&cache, "a", 40);
    put_sized(&cache, "b", 40);

    // remove_file cannot delete a directory, even for root.
    fs::remove_file(&a).unwrap();
    fs::create_dir(&a).unwrap();
    let leftover = a.join("partial");
    fs::write(&leftover, b"xyz").unwrap();

    cache.set_max_dir_size_bytes(60);
    let report = cache.enforce_quota();
    assert_eq!(report.evicted, vec!["a"]);
    assert_eq!(report.failed_deletes, 1);
    assert_eq!(report.bytes_after, 40);
    assert!(cache.peek("a").is_none());
    assert!(a.exists());

    // The stuck bytes no longer push later writes over the quota.
    cache.set_max_dir_size_bytes(100);
    put_sized(&cache, "c", 40);
    assert_eq!(keys(&cache), vec!["b", "c"]);
    assert_eq!(cache.used_bytes(), 80);

    let reconciled = cache.reconcile().unwrap();
    assert_eq!(reconciled.orphaned, vec![leftover]);
    assert_eq!(reconciled.orphaned_bytes, 3);
}
