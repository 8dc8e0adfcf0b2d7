use crate::config::ExpiryConfig;
use crate::date::{date_from_day_count, day_count, today};
use crate::error::{ExpiryError, Result};
use crate::lock::{LockMode, Locker};
use crate::memo::CheckMemo;
use crate::record::{version_from_record_name, AccessRecord};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Options for [`clear_with`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearOptions<V> {
    /// Version that is never deleted. Only versions strictly older than it may expire.
    pub reference: Option<V>,
    /// Age limit in days; falls back to [`ExpiryConfig::limit_days`].
    pub limit: Option<u32>,
    /// Scan even if the root was already examined today.
    pub force: bool,
}

impl<V> Default for ClearOptions<V> {
    fn default() -> Self {
        Self {
            reference: None,
            limit: None,
            force: false,
        }
    }
}

/// What a [`clear_with`] call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// The root was already examined today; nothing was locked or listed.
    pub skipped: bool,
    /// Number of access records considered for expiry.
    pub scanned: usize,
    /// Versioned directories that were removed.
    pub deleted: Vec<PathBuf>,
    /// Versioned directories left alone because another holder had them locked.
    pub in_use: Vec<PathBuf>,
}

enum Verdict {
    Kept,
    Deleted,
    InUse,
}

/// Remove versioned directories under `root` whose access records are older than the limit.
///
/// Locking:
/// - the whole scan holds an exclusive lock on `root`, so only one process lists and
///   deletes within a root at a time;
/// - each candidate is decided while holding an exclusive lock on its versioned directory,
///   which cannot be granted while any user holds a shared lock on it. That lock is only
///   tried, never waited for: a directory someone holds is in use and is skipped. A scan
///   therefore never waits on anything while it holds the root lock, so users that lock a
///   version before calling `clear` cannot deadlock against it.
///
/// Any error aborts the scan after releasing the locks held at that point.
pub fn clear_with<V, L>(
    root: &Path,
    options: &ClearOptions<V>,
    config: &ExpiryConfig,
    locker: &L,
    memo: &CheckMemo,
) -> Result<ClearReport>
where
    V: FromStr + Ord + Display,
    L: Locker,
{
    let current = day_count(today());
    // Key the memo by the canonical root so different spellings of one root share an entry.
    let memo_key = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    if memo.should_skip(&memo_key, current, options.force) {
        tracing::trace!(
            target = "nova.dir_expiry",
            root = %root.display(),
            "cache root already checked today"
        );
        return Ok(ClearReport {
            skipped: true,
            ..ClearReport::default()
        });
    }

    if !root_exists(root)? {
        return Ok(ClearReport::default());
    }

    let limit = i64::from(config.limit_or(options.limit));
    let root_lock = locker.acquire_exclusive(root)?;

    let excluded = options.reference.as_ref().map(ToString::to_string);
    let mut report = ClearReport::default();
    for name in list_record_versions(root, &config.record_suffix)? {
        if excluded.as_deref() == Some(name.as_str()) {
            continue;
        }

        let version = match name.parse::<V>() {
            Ok(version) => version,
            Err(_) => {
                tracing::warn!(
                    target = "nova.dir_expiry",
                    root = %root.display(),
                    name = %name,
                    "ignoring access record with unparsable version"
                );
                continue;
            }
        };
        if options.reference.as_ref() == Some(&version) {
            continue;
        }

        report.scanned += 1;
        let candidate = Candidate {
            root,
            name: &name,
            version: &version,
        };
        match candidate.expire(options.reference.as_ref(), current, limit, config, locker)? {
            Verdict::Kept => {}
            Verdict::Deleted => report.deleted.push(root.join(&name)),
            Verdict::InUse => report.in_use.push(root.join(&name)),
        }
    }

    locker.release(root_lock, false)?;

    tracing::debug!(
        target = "nova.dir_expiry",
        root = %root.display(),
        scanned = report.scanned,
        deleted = report.deleted.len(),
        in_use = report.in_use.len(),
        "finished expiry scan"
    );
    Ok(report)
}

struct Candidate<'a, V> {
    root: &'a Path,
    name: &'a str,
    version: &'a V,
}

impl<V: Ord> Candidate<'_, V> {
    fn expire<L: Locker>(
        &self,
        reference: Option<&V>,
        current: i64,
        limit: i64,
        config: &ExpiryConfig,
        locker: &L,
    ) -> Result<Verdict> {
        let dir = self.root.join(self.name);
        let record = self
            .root
            .join(format!("{}{}", self.name, config.record_suffix));

        // Early returns through `?` drop the guard, which unlocks without touching the
        // lock file.
        let Some(lock) = locker.try_acquire(&dir, LockMode::Exclusive)? else {
            tracing::debug!(
                target = "nova.dir_expiry",
                path = %dir.display(),
                "versioned directory is in use; skipping"
            );
            return Ok(Verdict::InUse);
        };

        let Some(access) = AccessRecord::read_if_exists(&record)? else {
            tracing::debug!(
                target = "nova.dir_expiry",
                path = %record.display(),
                "access record disappeared before it could be read"
            );
            locker.release(lock, false)?;
            return Ok(Verdict::Kept);
        };

        let age = current.saturating_sub(access.access_date);
        let expired = age > limit && reference.map_or(true, |reference| reference >= self.version);
        if !expired {
            locker.release(lock, false)?;
            return Ok(Verdict::Kept);
        }

        // Directory first: if that fails the record survives and a later scan retries.
        remove_dir_all_nofollow(&dir)?;
        remove_file_if_exists(&record)?;
        locker.remove_artifact(&record)?;

        tracing::info!(
            target = "nova.dir_expiry",
            path = %dir.display(),
            age_days = age,
            last_access = ?date_from_day_count(access.access_date),
            "removed expired versioned directory"
        );

        locker.release(lock, true)?;
        Ok(Verdict::Deleted)
    }
}

fn root_exists(root: &Path) -> Result<bool> {
    match std::fs::metadata(root) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ExpiryError::io_at(root, err)),
    }
}

/// Version names of all access records directly under `root`, sorted.
fn list_record_versions(root: &Path, suffix: &str) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ExpiryError::io_at(root, err)),
    };

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ExpiryError::io_at(root, err))?;
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            // Entries can race with other writers' temp files.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(ExpiryError::io_at(entry.path(), err)),
        };
        if !file_type.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(version) = version_from_record_name(file_name, suffix) {
            versions.push(version.to_string());
        }
    }

    versions.sort();
    Ok(versions)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ExpiryError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Recursively remove `path` without following symlinks. A missing path is not an error.
fn remove_dir_all_nofollow(path: &Path) -> Result<()> {
    let remove_err = |path: &Path, source: io::Error| ExpiryError::Remove {
        path: path.to_path_buf(),
        source,
    };

    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(remove_err(path, err)),
    };
    if !meta.is_dir() {
        // A symlinked (or plain file) entry: remove the entry itself, never its target.
        return remove_file_if_exists(path);
    }

    for entry in walkdir::WalkDir::new(path)
        .follow_links(false)
        .contents_first(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let missing = err
                    .io_error()
                    .is_some_and(|io_err| io_err.kind() == io::ErrorKind::NotFound);
                if missing {
                    continue;
                }
                let err_path = err.path().unwrap_or(path).to_path_buf();
                return Err(remove_err(&err_path, io::Error::other(err)));
            }
        };
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(remove_err(entry.path(), err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn list_record_versions_ignores_other_entries() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("1.0.0")).unwrap();
        fs::write(root.join("1.0.0_dir.expiry"), "AccessDate = 1\n").unwrap();
        fs::write(root.join("0.9.0_dir.expiry"), "AccessDate = 1\n").unwrap();
        fs::write(root.join("1.0.0-00LOCK"), "").unwrap();
        fs::write(root.join("1.0.0_dir.expiry.tmp.7.0"), "").unwrap();
        fs::create_dir(root.join("2.0.0_dir.expiry")).unwrap();

        let versions = list_record_versions(root, "_dir.expiry").unwrap();
        assert_eq!(versions, vec!["0.9.0".to_string(), "1.0.0".to_string()]);
    }

    #[test]
    fn list_record_versions_of_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let versions = list_record_versions(&tmp.path().join("missing"), "_dir.expiry").unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn remove_dir_all_nofollow_removes_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("1.0.0");
        fs::create_dir_all(dir.join("lib").join("deep")).unwrap();
        fs::write(dir.join("lib").join("deep").join("file.bin"), b"x").unwrap();

        remove_dir_all_nofollow(&dir).unwrap();
        assert!(!dir.exists());
        remove_dir_all_nofollow(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn remove_dir_all_nofollow_keeps_symlink_target() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("elsewhere");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), b"keep").unwrap();
        let link = tmp.path().join("1.0.0");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        remove_dir_all_nofollow(&link).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(target.join("keep.txt").is_file());
    }
}
