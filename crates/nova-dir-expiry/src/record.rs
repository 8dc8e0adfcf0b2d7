//! On-disk access records.
//!
//! Each versioned directory `<root>/<version>` has a sibling record file
//! `<root>/<version><record-suffix>` holding a single TOML key:
//!
//! ```text
//! AccessDate = 19876
//! ```
//!
//! The value is a day count as produced by [`crate::date::day_count`].

use crate::error::{ExpiryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    #[serde(rename = "AccessDate")]
    pub access_date: i64,
}

impl AccessRecord {
    pub fn new(access_date: i64) -> Self {
        Self { access_date }
    }

    /// Read the record at `path`.
    ///
    /// A missing file surfaces as an [`ExpiryError::IoAt`] with `NotFound`; malformed
    /// contents (including a missing `AccessDate`) are [`ExpiryError::InvalidRecord`].
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| ExpiryError::io_at(path, err))?;
        toml::from_str(&text).map_err(|err| ExpiryError::InvalidRecord {
            path: path.to_path_buf(),
            message: err.message().to_string(),
        })
    }

    /// Like [`AccessRecord::read`], but returns `Ok(None)` when the file does not exist.
    pub fn read_if_exists(path: &Path) -> Result<Option<Self>> {
        match Self::read(path) {
            Ok(record) => Ok(Some(record)),
            Err(ExpiryError::IoAt { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Atomically replace the record at `path` with this one.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = toml::to_string(self).map_err(|err| ExpiryError::InvalidRecord {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        atomic_write(path, text.as_bytes())
    }
}

/// Record path for the versioned directory `dir`: `<parent>/<name><suffix>`.
pub fn record_path(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let (root, version) = split_versioned_dir(dir)?;
    let mut name = version.to_os_string();
    name.push(suffix);
    Ok(root.join(name))
}

/// Split `<root>/<version>` into its cache root and version name.
pub(crate) fn split_versioned_dir(dir: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let invalid = || ExpiryError::InvalidPath {
        path: dir.to_path_buf(),
    };
    let version = dir.file_name().ok_or_else(invalid)?;
    let root = dir.parent().ok_or_else(invalid)?;
    let root = if root.as_os_str().is_empty() {
        Path::new(".")
    } else {
        root
    };
    Ok((root, version))
}

/// The version portion of a record file name, if `file_name` carries `suffix`.
pub(crate) fn version_from_record_name<'a>(file_name: &'a str, suffix: &str) -> Option<&'a str> {
    file_name
        .strip_suffix(suffix)
        .filter(|version| !version.is_empty())
}

/// Write `bytes` to a temporary sibling of `path`, then rename it over `path`.
///
/// The temporary file is named `<record>.<random>.tmp`, so it never carries the record
/// suffix and scans do not mistake it for a record. It is removed if anything fails
/// before the rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let (parent, file_name) = split_versioned_dir(path)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(file_name)
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| ExpiryError::io_at(parent, err))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| ExpiryError::io_at(tmp.path(), err))?;
    tmp.persist(path)
        .map_err(|err| ExpiryError::io_at(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_path_is_a_sibling_of_the_directory() {
        assert_eq!(
            record_path(Path::new("/cache/1.2.3"), "_dir.expiry").unwrap(),
            PathBuf::from("/cache/1.2.3_dir.expiry")
        );
        assert_eq!(
            record_path(Path::new("1.2.3"), "_dir.expiry").unwrap(),
            PathBuf::from("./1.2.3_dir.expiry")
        );
        assert!(matches!(
            record_path(Path::new("/"), "_dir.expiry"),
            Err(ExpiryError::InvalidPath { .. })
        ));
    }

    #[test]
    fn version_from_record_name_requires_suffix() {
        assert_eq!(
            version_from_record_name("1.0.0_dir.expiry", "_dir.expiry"),
            Some("1.0.0")
        );
        assert_eq!(version_from_record_name("1.0.0", "_dir.expiry"), None);
        assert_eq!(version_from_record_name("_dir.expiry", "_dir.expiry"), None);
        assert_eq!(
            version_from_record_name("1.0.0_dir.expiry.tmp.1.0", "_dir.expiry"),
            None
        );
    }

    #[test]
    fn write_then_read_preserves_day_count() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1.0.0_dir.expiry");
        for days in [-719_162, -1, 0, 1, 19_876, i64::MAX] {
            AccessRecord::new(days).write(&path).unwrap();
            assert_eq!(AccessRecord::read(&path).unwrap().access_date, days);
        }
    }

    #[test]
    fn record_is_a_single_keyed_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1.0.0_dir.expiry");
        AccessRecord::new(20_000).write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "AccessDate = 20000\n");

        // No temporary files are left behind.
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("1.0.0_dir.expiry")]);
    }

    #[test]
    fn missing_field_is_invalid_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1.0.0_dir.expiry");
        fs::write(&path, "LastUsed = 3\n").unwrap();
        let err = AccessRecord::read(&path).unwrap_err();
        assert!(
            matches!(&err, ExpiryError::InvalidRecord { path: p, .. } if p == &path),
            "unexpected error: {err}"
        );

        fs::write(&path, "AccessDate = \"yesterday\"\n").unwrap();
        assert!(matches!(
            AccessRecord::read(&path),
            Err(ExpiryError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn read_if_exists_maps_missing_file_to_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("9.9.9_dir.expiry");
        assert_eq!(AccessRecord::read_if_exists(&path).unwrap(), None);
    }
}
