use rescache::cache::{CacheOptions, CompletedResource, Fingerprint, ResourceCache};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const FP: Fingerprint = Fingerprint::new(0x1234_5678_9abc_def0);

fn put_sized(cache: &ResourceCache, key: &str, size: usize) -> PathBuf {
    let path = cache.product_path(key).unwrap();
    fs::write(&path, vec![1u8; size]).unwrap();
    cache
        .put(CompletedResource::new(key, &path, size as u64, FP))
        .unwrap();
    path
}

fn reopen(dir: &Path, quota: u64) -> ResourceCache {
    ResourceCache::open(CacheOptions::new(dir).with_max_dir_size_bytes(quota)).unwrap()
}

#[test]
fn test_entries_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let cache = reopen(dir.path(), 1_000);
        put_sized(&cache, "a", 10);
        put_sized(&cache, "b", 20);
    }

    let cache = reopen(dir.path(), 1_000);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.used_bytes(), 30);
    let product = cache.get_valid("b", Some(FP)).unwrap().unwrap();
    assert_eq!(product.read().unwrap().len(), 20);
}

#[test]
fn test_restart_preserves_recency_order() {
    let dir = tempdir().unwrap();
    {
        let cache = reopen(dir.path(), 1_000);
        put_sized(&cache, "a", 10);
        put_sized(&cache, "b", 10);
        put_sized(&cache, "c", 10);
        drop(cache.get_valid("a", Some(FP)).unwrap());
    }

    let cache = reopen(dir.path(), 1_000);
    let keys: Vec<String> = cache.entries().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["b", "c", "a"]);

    // New touches sort after everything recorded before the restart.
    put_sized(&cache, "d", 10);
    assert_eq!(cache.entries().last().unwrap().key, "d");
}

#[test]
fn test_restart_with_smaller_quota_evicts_on_open() {
    let dir = tempdir().unwrap();
    let a_path = {
        let cache = reopen(dir.path(), 1_000);
        let a_path = put_sized(&cache, "a", 25);
        for key in ["b", "c", "d"] {
            put_sized(&cache, key, 25);
        }
        a_path
    };

    let cache = reopen(dir.path(), 60);
    let keys: Vec<String> = cache.entries().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["d"]);
    assert_eq!(cache.used_bytes(), 25);
    assert!(!a_path.exists());
}

#[test]
fn test_restart_without_eviction_on_open() {
    let dir = tempdir().unwrap();
    {
        let cache = reopen(dir.path(), 1_000);
        put_sized(&cache, "a", 50);
        put_sized(&cache, "b", 30);
    }

    let cache = ResourceCache::open(
        CacheOptions::new(dir.path())
            .with_max_dir_size_bytes(60)
            .with_evict_on_open(false),
    )
    .unwrap();
    assert_eq!(cache.len(), 2);

    let report = cache.enforce_quota();
    assert_eq!(report.evicted, vec!["a"]);
}

#[test]
fn test_record_without_file_is_purged_on_read() {
    let dir = tempdir().unwrap();
    let path = {
        let cache = reopen(dir.path(), 1_000);
        put_sized(&cache, "a", 10)
    };
    fs::remove_file(&path).unwrap();

    let cache = reopen(dir.path(), 1_000);
    assert_eq!(cache.len(), 1);
    assert!(cache.get_valid("a", Some(FP)).unwrap().is_none());
    assert!(cache.is_empty());
    assert_eq!(cache.used_bytes(), 0);

    let cache = reopen(dir.path(), 1_000);
    assert!(cache.is_empty());
}

#[test]
fn test_reconcile_reports_orphans_and_purges_missing() {
    let dir = tempdir().unwrap();
    let cache = reopen(dir.path(), 1_000);
    put_sized(&cache, "kept", 5);
    let lost = put_sized(&cache, "lost", 5);
    fs::remove_file(lost).unwrap();

    let orphan = dir.path().join("partial.download");
    fs::write(&orphan, b"half").unwrap();
    cache.add_pending_cache_entry("inflight", FP).unwrap();
    fs::write(cache.product_path("inflight").unwrap(), b"in progress").unwrap();

    let report = cache.reconcile().unwrap();
    assert_eq!(report.purged_missing, vec!["lost"]);
    assert_eq!(report.orphaned, vec![orphan.clone()]);
    assert_eq!(report.orphaned_bytes, 4);
    assert_eq!(report.scanned_files, 3);
    assert!(orphan.exists(), "reconcile must not delete orphans");
    assert!(cache.peek("kept").is_some());

    let again = cache.reconcile().unwrap();
    assert!(again.purged_missing.is_empty());
}
