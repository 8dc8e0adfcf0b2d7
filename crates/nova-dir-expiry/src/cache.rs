use crate::clear::{clear_with, ClearOptions, ClearReport};
use crate::config::ExpiryConfig;
use crate::error::{ExpiryError, Result};
use crate::lock::{FileLocker, LockMode, Locker};
use crate::memo::CheckMemo;
use crate::record::split_versioned_dir;
use crate::touch::{touch_with, TouchOptions, TouchOutcome};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Entry point bundling configuration, a [`Locker`] and a [`CheckMemo`].
///
/// [`ExpiryCache::new`] shares the process-wide memo; tests and embedders that want
/// isolated state use [`ExpiryCache::with_parts`].
#[derive(Debug)]
pub struct ExpiryCache<L = FileLocker> {
    config: ExpiryConfig,
    locker: L,
    memo: Arc<CheckMemo>,
}

impl ExpiryCache<FileLocker> {
    pub fn new(config: ExpiryConfig) -> Self {
        let locker = FileLocker::from_config(&config);
        Self {
            config,
            locker,
            memo: CheckMemo::global(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(ExpiryConfig::from_env())
    }
}

impl<L: Locker> ExpiryCache<L> {
    pub fn with_parts(config: ExpiryConfig, locker: L, memo: Arc<CheckMemo>) -> Self {
        Self {
            config,
            locker,
            memo,
        }
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    pub fn locker(&self) -> &L {
        &self.locker
    }

    pub fn memo(&self) -> &CheckMemo {
        &self.memo
    }

    /// Lock the versioned directory `dir`. Hold a shared lock while using it.
    pub fn lock(&self, dir: &Path, mode: LockMode) -> Result<L::Guard> {
        self.locker.acquire(dir, mode)
    }

    /// Release a lock from [`ExpiryCache::lock`]; `clear` also deletes the lock file.
    pub fn unlock(&self, guard: L::Guard, clear: bool) -> Result<()> {
        self.locker.release(guard, clear)
    }

    pub fn touch(&self, dir: &Path, options: &TouchOptions) -> Result<TouchOutcome> {
        touch_with(dir, options, &self.config, &self.locker)
    }

    pub fn clear<V>(&self, root: &Path, options: &ClearOptions<V>) -> Result<ClearReport>
    where
        V: FromStr + Ord + Display,
    {
        clear_with(root, options, &self.config, &self.locker, &self.memo)
    }

    /// Touch `dir`, then expire older versions in its cache root.
    ///
    /// The touched version is passed as the reference, so it is never locked or deleted
    /// by the scan and newer versions are kept regardless of age.
    pub fn touch_and_clear<V>(
        &self,
        dir: &Path,
        options: &TouchOptions,
        limit: Option<u32>,
    ) -> Result<ClearReport>
    where
        V: FromStr + Ord + Display,
    {
        let (root, name) = split_versioned_dir(dir)?;
        let name = name.to_str().ok_or_else(|| ExpiryError::InvalidPath {
            path: dir.to_path_buf(),
        })?;
        let reference = name
            .parse::<V>()
            .map_err(|_| ExpiryError::InvalidVersion {
                value: name.to_string(),
            })?;

        self.touch(dir, options)?;
        self.clear(
            root,
            &ClearOptions {
                reference: Some(reference),
                limit,
                force: false,
            },
        )
    }
}
