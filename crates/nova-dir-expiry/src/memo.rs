use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Remembers which cache roots were already scanned for expired directories, and on
/// which day, so repeated `clear` calls within a day are cheap.
#[derive(Debug, Default)]
pub struct CheckMemo {
    checked: Mutex<HashMap<PathBuf, i64>>,
}

impl CheckMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide memo used by the default entry points.
    pub fn global() -> Arc<CheckMemo> {
        static GLOBAL: OnceLock<Arc<CheckMemo>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CheckMemo::new())).clone()
    }

    /// Returns `true` if `root` was already examined on day `today` and `force` is unset.
    ///
    /// Otherwise records `today` for `root` and returns `false`. The entry marks the root
    /// as examined whether or not the scan that follows deletes anything.
    pub fn should_skip(&self, root: &Path, today: i64, force: bool) -> bool {
        let mut checked = self
            .checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !force && checked.get(root) == Some(&today) {
            return true;
        }
        checked.insert(root.to_path_buf(), today);
        false
    }

    /// Day on which `root` was last examined, if ever.
    pub fn last_checked(&self, root: &Path) -> Option<i64> {
        self.checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(root)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_check_on_same_day_is_skipped() {
        let memo = CheckMemo::new();
        let root = Path::new("/cache/a");
        assert!(!memo.should_skip(root, 100, false));
        assert!(memo.should_skip(root, 100, false));
        assert_eq!(memo.last_checked(root), Some(100));
    }

    #[test]
    fn force_rechecks_and_new_day_supersedes() {
        let memo = CheckMemo::new();
        let root = Path::new("/cache/a");
        assert!(!memo.should_skip(root, 100, false));
        assert!(!memo.should_skip(root, 100, true));
        assert!(!memo.should_skip(root, 101, false));
        assert_eq!(memo.last_checked(root), Some(101));
        assert!(memo.should_skip(root, 101, false));
    }

    #[test]
    fn roots_are_tracked_independently() {
        let memo = CheckMemo::new();
        assert!(!memo.should_skip(Path::new("/cache/a"), 100, false));
        assert!(!memo.should_skip(Path::new("/cache/b"), 100, false));
        assert_eq!(memo.last_checked(Path::new("/cache/c")), None);
    }
}
