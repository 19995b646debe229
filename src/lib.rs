//! rescache - disk resource cache
//!
//! Stores downloaded resources as files in a cache directory, indexed by key
//! and guarded by a fingerprint of the metadata they were fetched under.
//! In-flight fetches are deduplicated, every index change is written through
//! to an SQLite index, and least-recently-used entries are evicted once the
//! directory exceeds its byte quota.
//!
//! The [`cache`] module is the library. [`app`], [`cli`], [`config`] and
//! [`logging`] make up the `rescache` administration binary.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;

pub use app::run_app;
pub use cache::{CacheOptions, CompletedResource, Fingerprint, ResourceCache};
pub use error::{CacheError, CacheResult};
