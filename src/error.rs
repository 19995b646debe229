//! Error types and exit codes.
//!
//! [`CacheError`] is what every fallible [`crate::cache::ResourceCache`]
//! operation returns. Stale entries, missing product files and failed
//! deletions during eviction are not errors: they degrade to a cache miss
//! and are reported through [`crate::cache::RemovalCause`] instead.
//!
//! [`ExitCode`] and [`StructuredError`] are used by the `rescache` binary.

use serde::Serialize;
use std::io;
use std::path::PathBuf;

use crate::cache::persistence::PersistenceError;

/// Errors surfaced by the resource cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// A caller passed an empty key, absent metadata or an out-of-range setting.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The durable entry store could not be read or written.
    ///
    /// The in-memory index is left unchanged when this is returned, so the
    /// caller can retry the fetch instead of assuming the resource is cached.
    #[error("cache unavailable: {0}")]
    Persistence(#[from] PersistenceError),

    /// The cache directory could not be created or inspected.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Exit code the CLI reports for this error.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidArgument(_) => ExitCode::InvalidArgument,
            Self::Persistence(_) | Self::Io { .. } => ExitCode::CacheUnavailable,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Exit codes for the `rescache` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// The command completed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Bad flag, setting or key.
    InvalidArgument = 2,
    /// The cache directory or its index could not be used.
    CacheUnavailable = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "RC000",
            Self::GeneralError => "RC001",
            Self::InvalidArgument => "RC002",
            Self::CacheUnavailable => "RC003",
        }
    }

    /// Pick the exit code for an error bubbled up to `main`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<CacheError>())
            .map_or(Self::GeneralError, CacheError::exit_code)
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "RC003")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
        }
    }
}
