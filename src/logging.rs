//! Logger setup for the administration binary.
//!
//! The library itself only emits records through the `log` facade. This
//! module wires those records to `env_logger`:
//!
//! - `RUST_LOG`, when set, decides the filter (e.g. `RUST_LOG=rescache=trace`)
//! - otherwise `-q` selects errors only, `-v` debug and `-vv` trace
//! - the default is info
//!
//! Debug and trace output includes the module path so records from the
//! pending registry, the eviction monitor and the index can be told apart.

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Install the global logger.
///
/// Calling this again after a logger is installed leaves the first one in
/// place.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from the CLI (0=info, 1=debug, 2+=trace)
/// * `quiet` - Only show errors; ignored when `RUST_LOG` is set
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var_os("RUST_LOG").is_some();
    let level = level_for(verbose, quiet);

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(level);
    }

    let with_module = from_env || level >= LevelFilter::Debug;
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        let timestamp = buf.timestamp_millis();
        if with_module {
            writeln!(
                buf,
                "{timestamp} {style}{:<5}{style:#} [{}] {}",
                record.level(),
                record.module_path().unwrap_or("-"),
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{timestamp} {style}{:<5}{style:#} {}",
                record.level(),
                record.args()
            )
        }
    });

    if builder.try_init().is_err() {
        log::debug!("Logger already installed, keeping it");
        return;
    }
    if from_env {
        log::debug!("Logging configured from RUST_LOG");
    } else {
        log::debug!("Logging initialized at level: {}", level);
    }
}

/// Map CLI flags to a level. `quiet` wins over `verbose`.
fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}
