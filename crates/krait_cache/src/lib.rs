#![deny(missing_docs)]

//! The shared package cache.
//!
//! A package cache is a directory holding downloaded archives and, per
//! package, one extracted directory named `<name>-<version>-<build>`.
//! Multiple environments (and multiple processes) share one cache; writes
//! are guarded by per-package locks, and every mutation is staged in a
//! temporary location and atomically renamed so a failure never corrupts a
//! previously valid entry.

mod package_cache;
pub mod validation;

pub use package_cache::{CacheKey, PackageCache, PackageCacheError, ValidationPolicy};

/// The directory name used for package caches, by conda convention.
pub const PACKAGE_CACHE_DIR: &str = "pkgs";
