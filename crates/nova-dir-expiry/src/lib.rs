//! Expiry of versioned cache directories shared between processes.
//!
//! A cache root holds versioned subdirectories plus one access record per version:
//!
//! ```text
//! <root>/
//!   1.2.0/                 versioned directory
//!   1.2.0_dir.expiry       access record (`AccessDate = <days since 1970-01-01>`)
//!   1.2.0-00LOCK           lock file for `1.2.0/`
//!   2.0.0/
//!   2.0.0_dir.expiry
//! <root>-00LOCK            lock file for the whole root
//! ```
//!
//! The protocol relies on advisory file locks only:
//! - users of a versioned directory hold a shared lock on it ([`ExpiryCache::lock`]) and
//!   refresh its record with [`touch`];
//! - [`clear`] locks the root exclusively, then tries an exclusive lock on each candidate
//!   before deleting it; a directory someone still holds is skipped, never removed;
//! - a [`CheckMemo`] limits full scans of a root to one per day.

mod cache;
mod clear;
mod config;
mod date;
mod error;
mod lock;
mod memo;
mod record;
mod touch;

pub use cache::ExpiryCache;
pub use clear::{clear_with, ClearOptions, ClearReport};
pub use config::{
    resolve_limit, ExpiryConfig, DEFAULT_EXPIRY_LIMIT_DAYS, DEFAULT_LOCK_SUFFIX,
    DEFAULT_RECORD_SUFFIX, EXPIRY_LIMIT_ENV,
};
pub use date::{date_from_day_count, day_count, today};
pub use error::{ExpiryError, Result};
pub use lock::{FileLock, FileLocker, LockMode, Locker};
pub use memo::CheckMemo;
pub use record::{record_path, AccessRecord};
pub use touch::{touch_with, TouchOptions, TouchOutcome};

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

/// Touch `dir` using the environment-derived configuration.
pub fn touch(dir: &Path, options: &TouchOptions) -> Result<TouchOutcome> {
    ExpiryCache::from_env().touch(dir, options)
}

/// Clear expired versions under `root` using the environment-derived configuration and
/// the process-wide [`CheckMemo`].
pub fn clear<V>(root: &Path, options: &ClearOptions<V>) -> Result<ClearReport>
where
    V: FromStr + Ord + Display,
{
    ExpiryCache::from_env().clear(root, options)
}
