//! Command-line interface definitions for the cache administration tool.
//!
//! The binary inspects and maintains a cache directory. It never downloads
//! anything; fetching is the job of the application embedding the library.
//!
//! # Example
//!
//! ```bash
//! # Show usage and counters for the default cache directory
//! rescache stats
//!
//! # List entries of a specific cache as JSON
//! rescache --cache-dir /var/cache/products list --json
//!
//! # Shrink the quota and evict right away
//! rescache --max-size-mb 512 evict
//!
//! # Look for files the index does not know about
//! rescache -v reconcile
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and maintain a disk resource cache.
#[derive(Debug, Parser)]
#[command(name = "rescache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    ///
    /// Defaults to the platform configuration directory, e.g.
    /// ~/.config/rescache/config.toml on Linux.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory holding the product files and the index
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Quota for the cache directory in megabytes
    #[arg(long, value_name = "MB", global = true)]
    pub max_size_mb: Option<u64>,

    /// Share of the quota to free below the limit when evicting (0-100)
    #[arg(long, value_name = "PERCENT", global = true, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub eviction_percentage: Option<u8>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show usage, quota and counters
    Stats(OutputArgs),
    /// List cached entries, least recently used first
    List(OutputArgs),
    /// Run an eviction pass now
    Evict(OutputArgs),
    /// Remove one entry and its file
    Remove(RemoveArgs),
    /// Compare the cache directory with the index
    ///
    /// Records whose file is gone are purged. Unreferenced files are only
    /// reported.
    Reconcile(OutputArgs),
}

/// Output selection shared by the reporting subcommands.
#[derive(Debug, Args, Default)]
pub struct OutputArgs {
    /// Print machine-readable JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the remove subcommand.
#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Key of the entry to remove
    #[arg(value_name = "KEY")]
    pub key: String,
}
