use clap::Parser;
use rescache::app::run_with_output;
use rescache::cache::{CacheOptions, CompletedResource, Fingerprint, ResourceCache};
use rescache::cli::Cli;
use rescache::error::ExitCode;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// A cache directory with two entries and an empty config file, so the
/// user's own configuration never leaks into the run.
fn seeded() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "").unwrap();

    let cache_dir = dir.path().join("cache");
    let cache = ResourceCache::open(CacheOptions::new(&cache_dir)).unwrap();
    for (key, size) in [("alpha", 300usize), ("beta", 700)] {
        let path = cache.product_path(key).unwrap();
        fs::write(&path, vec![b'z'; size]).unwrap();
        cache
            .put(CompletedResource::new(key, path, size as u64, Fingerprint::new(5)))
            .unwrap();
    }
    (dir, config)
}

fn run(config: &Path, args: &[&str]) -> (ExitCode, String) {
    let cache_dir = config.with_file_name("cache");
    let mut argv = vec![
        "rescache".to_string(),
        "-q".to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--cache-dir".to_string(),
        cache_dir.display().to_string(),
    ];
    argv.extend(args.iter().map(|s| s.to_string()));
    let cli = Cli::try_parse_from(argv).unwrap();

    let mut out = Vec::new();
    let code = run_with_output(cli, &mut out).unwrap();
    (code, String::from_utf8(out).unwrap())
}

#[test]
fn test_list_json_orders_by_recency() {
    let (_dir, config) = seeded();
    let (code, out) = run(&config, &["list", "--json"]);
    assert_eq!(code, ExitCode::Success);

    let entries: serde_json::Value = serde_json::from_str(&out).unwrap();
    let keys: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["alpha", "beta"]);
}

#[test]
fn test_stats_json_reports_usage() {
    let (_dir, config) = seeded();
    let (_, out) = run(&config, &["stats", "--json"]);

    let stats: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(stats["entries"], 2);
    assert_eq!(stats["used_bytes"], 1000);
    assert_eq!(stats["eviction_percentage"], 25);
}

#[test]
fn test_stats_text() {
    let (_dir, config) = seeded();
    let (_, out) = run(&config, &["stats"]);
    assert!(out.contains("Entries:          2"));
    assert!(out.contains("Cache directory:"));
}

#[test]
fn test_evict_within_quota_reports_nothing_to_do() {
    let (_dir, config) = seeded();
    fs::write(&config, "max_dir_size_mb = 1\n").unwrap();

    let (code, out) = run(&config, &["evict"]);
    assert_eq!(code, ExitCode::Success);
    assert!(out.contains("Within quota"));

    let (_, out) = run(&config, &["evict", "--json"]);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["triggered"], false);
    assert_eq!(report["quota_bytes"], 1024 * 1024);
}

#[test]
fn test_remove_known_and_unknown_keys() {
    let (_dir, config) = seeded();

    let (code, out) = run(&config, &["remove", "alpha"]);
    assert_eq!(code, ExitCode::Success);
    assert!(out.contains("Removed alpha"));

    let (code, out) = run(&config, &["remove", "alpha"]);
    assert_eq!(code, ExitCode::GeneralError);
    assert!(out.contains("No entry for key alpha"));
}

#[test]
fn test_reconcile_json() {
    let (_dir, config) = seeded();
    let stray = config.with_file_name("cache").join("stray");
    fs::write(&stray, b"??").unwrap();

    let (_, out) = run(&config, &["reconcile", "--json"]);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["scanned_files"], 3);
    assert_eq!(report["orphaned_bytes"], 2);
    assert_eq!(report["orphaned"][0], stray.display().to_string());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    let cli = Cli::try_parse_from([
        "rescache",
        "-q",
        "--config",
        dir.path().join("absent.toml").to_str().unwrap(),
        "stats",
    ])
    .unwrap();

    let mut out = Vec::new();
    let err = run_with_output(cli, &mut out).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{err:#}").contains("configuration file not found"));
}

#[test]
fn test_invalid_settings_map_to_invalid_argument() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "max_dir_size_mb = 0\n").unwrap();
    let cli = Cli::try_parse_from([
        "rescache",
        "-q",
        "--config",
        config.to_str().unwrap(),
        "--cache-dir",
        dir.path().join("cache").to_str().unwrap(),
        "stats",
    ])
    .unwrap();

    let mut out = Vec::new();
    let err = run_with_output(cli, &mut out).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidArgument);
}
