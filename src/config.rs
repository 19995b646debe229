//! Application configuration management.
//!
//! Settings are merged from several layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config PATH`, or `config.toml` in the platform
//!    configuration directory)
//! 3. Environment variables prefixed with `RESCACHE_`
//!    (e.g. `RESCACHE_MAX_DIR_SIZE_MB=2048`)
//! 4. Command-line flags
//!
//! # Example file
//!
//! ```toml
//! cache_dir = "/var/cache/products"
//! max_dir_size_mb = 4096
//! eviction_percentage = 30
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{
    CacheOptions, DEFAULT_EVICTION_PERCENTAGE, DEFAULT_INDEX_FILE, DEFAULT_MAX_DIR_SIZE_MB,
};
use crate::cli::Cli;
use crate::error::CacheError;

/// Prefix of the environment variables read by [`Settings::load`].
pub const ENV_PREFIX: &str = "RESCACHE_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "rescache", "rescache")
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the product files and the index.
    pub cache_dir: PathBuf,
    /// Quota in megabytes.
    pub max_dir_size_mb: u64,
    /// Share of the quota freed below the limit by an eviction pass.
    pub eviction_percentage: u8,
    /// Name of the SQLite index inside `cache_dir`.
    pub index_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            max_dir_size_mb: DEFAULT_MAX_DIR_SIZE_MB,
            eviction_percentage: DEFAULT_EVICTION_PERCENTAGE,
            index_file: DEFAULT_INDEX_FILE.to_string(),
        }
    }
}

impl Settings {
    /// Platform cache directory, or a folder under the temp dir when the
    /// platform offers none.
    #[must_use]
    pub fn default_cache_dir() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.cache_dir().join("products"))
            .unwrap_or_else(|| std::env::temp_dir().join("rescache"))
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The layered configuration source without the CLI layer.
    ///
    /// A missing default file is skipped silently.
    #[must_use]
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let file = config_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path);
        if let Some(file) = file {
            log::debug!("Reading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load defaults, file and environment.
    ///
    /// # Errors
    ///
    /// Fails if an explicitly given file does not exist, or if any layer
    /// holds a value of the wrong type.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.is_file() {
                anyhow::bail!("configuration file not found: {}", path.display());
            }
        }
        Self::figment(config_path)
            .extract()
            .context("invalid configuration")
    }

    /// Load every layer including the command line, then validate.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`], plus [`Self::validate`] failures.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut settings = Self::load(cli.config.as_deref())?;
        settings.merge_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    /// Apply flags given on the command line.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.cache_dir {
            self.cache_dir.clone_from(dir);
        }
        if let Some(mb) = cli.max_size_mb {
            self.max_dir_size_mb = mb;
        }
        if let Some(percentage) = cli.eviction_percentage {
            self.eviction_percentage = percentage;
        }
    }

    /// Check the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidArgument`] for an empty cache dir or
    /// index name, a zero quota, or a percentage above 100.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::invalid("cache_dir must not be empty"));
        }
        if self.index_file.trim().is_empty() {
            return Err(CacheError::invalid("index_file must not be empty"));
        }
        if self.max_dir_size_mb == 0 {
            return Err(CacheError::invalid("max_dir_size_mb must be greater than 0"));
        }
        if self.eviction_percentage > 100 {
            return Err(CacheError::invalid(format!(
                "eviction_percentage must be between 0 and 100, got {}",
                self.eviction_percentage
            )));
        }
        Ok(())
    }

    /// Options for opening a [`crate::cache::ResourceCache`] with these
    /// settings.
    #[must_use]
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::new(&self.cache_dir)
            .with_max_dir_size_mb(self.max_dir_size_mb)
            .with_eviction_percentage(self.eviction_percentage)
            .with_index_file(self.index_file.clone())
    }
}
