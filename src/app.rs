//! Subcommand dispatch for the `rescache` binary.

use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::cache::{CacheEntry, CacheStats, EvictionReport, ReconcileReport, ResourceCache};
use crate::cli::{Cli, Commands, OutputArgs};
use crate::config::Settings;
use crate::error::ExitCode;
use crate::logging::init_logging;

/// `stats --json` document.
#[derive(Debug, Serialize)]
struct StatsReport {
    cache_dir: PathBuf,
    eviction_percentage: u8,
    target_bytes: u64,
    #[serde(flatten)]
    stats: CacheStats,
}

/// Run the CLI, printing to stdout.
///
/// # Errors
///
/// Returns configuration, cache and output errors; `main` maps them to an
/// [`ExitCode`] with [`ExitCode::for_error`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with_output(cli, &mut out)
}

/// Run the CLI, writing command output to `out`.
///
/// # Errors
///
/// Same as [`run_app`].
pub fn run_with_output(cli: Cli, out: &mut dyn Write) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let settings = Settings::from_cli(&cli)?;
    log::debug!("Effective settings: {:?}", settings);

    // An explicit evict should report what it removed, so the pass on open
    // is skipped for it.
    let evict_on_open = !matches!(cli.command, Commands::Evict(_));
    let cache = ResourceCache::open(settings.cache_options().with_evict_on_open(evict_on_open))
        .with_context(|| format!("cannot open cache at {}", settings.cache_dir.display()))?;

    match cli.command {
        Commands::Stats(args) => print_stats(&cache, &args, out)?,
        Commands::List(args) => print_entries(&cache.entries(), &args, out)?,
        Commands::Evict(args) => print_eviction(&cache.enforce_quota(), &args, out)?,
        Commands::Remove(args) => {
            let removed = cache
                .remove(&args.key)
                .with_context(|| format!("cannot remove {}", args.key))?;
            if !removed {
                writeln!(out, "No entry for key {}", args.key)?;
                return Ok(ExitCode::GeneralError);
            }
            writeln!(out, "Removed {}", args.key)?;
        }
        Commands::Reconcile(args) => {
            let report = cache.reconcile().context("reconcile failed")?;
            print_reconcile(&report, &args, out)?;
        }
    }
    Ok(ExitCode::Success)
}

fn print_json<T: Serialize + ?Sized>(value: &T, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_stats(cache: &ResourceCache, args: &OutputArgs, out: &mut dyn Write) -> Result<()> {
    let report = StatsReport {
        cache_dir: cache.cache_directory(),
        eviction_percentage: cache.eviction_percentage(),
        target_bytes: cache.eviction_target_bytes(),
        stats: cache.stats(),
    };
    if args.json {
        return print_json(&report, out);
    }

    let stats = &report.stats;
    let percent_used = if stats.max_dir_size_bytes == 0 {
        0.0
    } else {
        stats.used_bytes as f64 / stats.max_dir_size_bytes as f64 * 100.0
    };
    writeln!(out, "Cache directory:  {}", report.cache_dir.display())?;
    writeln!(out, "Entries:          {}", stats.entries)?;
    writeln!(
        out,
        "Used:             {} of {} ({percent_used:.1}%)",
        ByteSize::b(stats.used_bytes),
        ByteSize::b(stats.max_dir_size_bytes)
    )?;
    writeln!(
        out,
        "Eviction target:  {} ({}% below quota)",
        ByteSize::b(report.target_bytes),
        report.eviction_percentage
    )?;
    Ok(())
}

fn print_entries(entries: &[CacheEntry], args: &OutputArgs, out: &mut dyn Write) -> Result<()> {
    if args.json {
        return print_json(entries, out);
    }
    if entries.is_empty() {
        writeln!(out, "Cache is empty")?;
        return Ok(());
    }
    for entry in entries {
        writeln!(
            out,
            "{}  {:>10}  {}  {}",
            entry.last_touched_at().format("%Y-%m-%d %H:%M:%S"),
            ByteSize::b(entry.size_bytes).to_string(),
            entry.fingerprint,
            entry.key
        )?;
    }
    let total: u64 = entries.iter().map(|entry| entry.size_bytes).sum();
    writeln!(out, "{} entries, {}", entries.len(), ByteSize::b(total))?;
    Ok(())
}

fn print_eviction(report: &EvictionReport, args: &OutputArgs, out: &mut dyn Write) -> Result<()> {
    if args.json {
        return print_json(report, out);
    }
    if !report.triggered {
        writeln!(
            out,
            "Within quota: {} of {}",
            ByteSize::b(report.bytes_before),
            ByteSize::b(report.quota_bytes)
        )?;
        return Ok(());
    }
    writeln!(
        out,
        "Evicted {} entries, freed {} ({} -> {})",
        report.evicted.len(),
        ByteSize::b(report.bytes_freed()),
        ByteSize::b(report.bytes_before),
        ByteSize::b(report.bytes_after)
    )?;
    if report.skipped_pinned > 0 {
        writeln!(out, "{} entries in use were skipped", report.skipped_pinned)?;
    }
    if report.failed_deletes > 0 {
        writeln!(out, "{} files could not be deleted", report.failed_deletes)?;
    }
    Ok(())
}

fn print_reconcile(report: &ReconcileReport, args: &OutputArgs, out: &mut dyn Write) -> Result<()> {
    if args.json {
        return print_json(report, out);
    }
    writeln!(out, "Scanned {} files", report.scanned_files)?;
    for key in &report.purged_missing {
        writeln!(out, "purged  {key}  (file missing)")?;
    }
    for path in &report.orphaned {
        writeln!(out, "orphan  {}", path.display())?;
    }
    if report.is_clean() {
        writeln!(out, "Index and directory agree")?;
    } else {
        writeln!(
            out,
            "{} orphaned files ({}), {} records purged",
            report.orphaned.len(),
            ByteSize::b(report.orphaned_bytes),
            report.purged_missing.len()
        )?;
    }
    Ok(())
}
