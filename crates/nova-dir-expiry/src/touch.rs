use crate::config::ExpiryConfig;
use crate::date::{day_count, today};
use crate::error::Result;
use crate::lock::Locker;
use crate::record::{record_path, AccessRecord};
use std::path::Path;
use time::Date;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TouchOptions {
    /// Access date to record. Defaults to [`today`].
    pub date: Option<Date>,
    /// Rewrite the record even if it already holds `date`.
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchOutcome {
    /// The record already held the requested date and was left untouched.
    Fresh,
    /// The record was (re)written.
    Written,
}

/// Record an access of the versioned directory `dir`.
///
/// The record lives next to `dir` (see [`record_path`]) and is guarded by an exclusive
/// lock on the record path itself, so concurrent touchers of one version serialize while
/// touchers of other versions are unaffected. Callers using `dir` are expected to hold at
/// least a shared lock on it for as long as they use it.
pub fn touch_with<L: Locker>(
    dir: &Path,
    options: &TouchOptions,
    config: &ExpiryConfig,
    locker: &L,
) -> Result<TouchOutcome> {
    let record = record_path(dir, &config.record_suffix)?;
    let access_date = day_count(options.date.unwrap_or_else(today));

    let lock = locker.acquire_exclusive(&record)?;

    if !options.force && holds_date(&record, access_date) {
        tracing::trace!(
            target = "nova.dir_expiry",
            path = %record.display(),
            access_date,
            "access record already fresh"
        );
        locker.release(lock, false)?;
        return Ok(TouchOutcome::Fresh);
    }

    AccessRecord::new(access_date).write(&record)?;
    tracing::debug!(
        target = "nova.dir_expiry",
        path = %record.display(),
        access_date,
        force = options.force,
        "wrote access record"
    );

    locker.release(lock, false)?;
    Ok(TouchOutcome::Written)
}

fn holds_date(record: &Path, access_date: i64) -> bool {
    match AccessRecord::read_if_exists(record) {
        Ok(Some(existing)) => existing.access_date == access_date,
        Ok(None) => false,
        Err(err) => {
            // The record is about to be replaced, so a corrupt one is not fatal here.
            tracing::debug!(
                target = "nova.dir_expiry",
                path = %record.display(),
                error = %err,
                "replacing unreadable access record"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FileLocker;
    use std::fs;
    use tempfile::TempDir;
    use time::Duration;

    fn setup() -> (TempDir, ExpiryConfig, FileLocker) {
        let tmp = TempDir::new().unwrap();
        let config = ExpiryConfig::default();
        let locker = FileLocker::from_config(&config);
        (tmp, config, locker)
    }

    #[test]
    fn first_touch_writes_record() {
        let (tmp, config, locker) = setup();
        let dir = tmp.path().join("1.0.0");
        fs::create_dir(&dir).unwrap();

        let outcome = touch_with(&dir, &TouchOptions::default(), &config, &locker).unwrap();
        assert_eq!(outcome, TouchOutcome::Written);

        let record = AccessRecord::read(&tmp.path().join("1.0.0_dir.expiry")).unwrap();
        assert_eq!(record.access_date, day_count(today()));
    }

    #[test]
    fn explicit_date_is_recorded() {
        let (tmp, config, locker) = setup();
        let dir = tmp.path().join("1.0.0");
        let date = today() - Duration::days(45);

        let options = TouchOptions {
            date: Some(date),
            force: false,
        };
        touch_with(&dir, &options, &config, &locker).unwrap();

        let record = AccessRecord::read(&tmp.path().join("1.0.0_dir.expiry")).unwrap();
        assert_eq!(record.access_date, day_count(date));
    }

    #[test]
    fn stale_record_is_rewritten_without_force() {
        let (tmp, config, locker) = setup();
        let dir = tmp.path().join("1.0.0");
        let record_path = tmp.path().join("1.0.0_dir.expiry");
        AccessRecord::new(day_count(today()) - 3)
            .write(&record_path)
            .unwrap();

        let outcome = touch_with(&dir, &TouchOptions::default(), &config, &locker).unwrap();
        assert_eq!(outcome, TouchOutcome::Written);
        assert_eq!(
            AccessRecord::read(&record_path).unwrap().access_date,
            day_count(today())
        );
    }

    #[test]
    fn corrupt_record_is_replaced() {
        let (tmp, config, locker) = setup();
        let dir = tmp.path().join("1.0.0");
        let record_path = tmp.path().join("1.0.0_dir.expiry");
        fs::write(&record_path, "garbage").unwrap();

        let outcome = touch_with(&dir, &TouchOptions::default(), &config, &locker).unwrap();
        assert_eq!(outcome, TouchOutcome::Written);
        assert!(AccessRecord::read(&record_path).is_ok());
    }
}
