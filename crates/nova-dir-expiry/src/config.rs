use std::ffi::OsStr;
use std::time::Duration;

/// Environment variable consulted for the expiry limit when none is passed explicitly.
pub const EXPIRY_LIMIT_ENV: &str = "NOVA_DIR_EXPIRY_LIMIT";

/// Default age (in days) after which an unused versioned directory may be removed.
pub const DEFAULT_EXPIRY_LIMIT_DAYS: u32 = 30;

/// Suffix appended to a version to name its access record inside the cache root.
pub const DEFAULT_RECORD_SUFFIX: &str = "_dir.expiry";

/// Suffix appended to a path to name the advisory lock file protecting it.
pub const DEFAULT_LOCK_SUFFIX: &str = "-00LOCK";

/// Settings shared by `touch`, `clear` and the lock manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Directories whose access record is more than this many days old are expired.
    pub limit_days: u32,
    pub record_suffix: String,
    pub lock_suffix: String,
    /// Upper bound on lock acquisition. `None` blocks until the lock is available.
    pub lock_timeout: Option<Duration>,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            limit_days: DEFAULT_EXPIRY_LIMIT_DAYS,
            record_suffix: DEFAULT_RECORD_SUFFIX.to_string(),
            lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
            lock_timeout: None,
        }
    }
}

impl ExpiryConfig {
    pub fn from_env() -> Self {
        Self {
            limit_days: resolve_limit(None),
            ..Self::default()
        }
    }

    /// Returns `explicit` when set, otherwise the configured limit.
    pub fn limit_or(&self, explicit: Option<u32>) -> u32 {
        explicit.unwrap_or(self.limit_days)
    }
}

/// Resolve the expiry limit: explicit value, then [`EXPIRY_LIMIT_ENV`], then the default.
pub fn resolve_limit(explicit: Option<u32>) -> u32 {
    if let Some(limit) = explicit {
        return limit;
    }
    parse_limit(std::env::var_os(EXPIRY_LIMIT_ENV).as_deref())
}

fn parse_limit(raw: Option<&OsStr>) -> u32 {
    let Some(raw) = raw else {
        return DEFAULT_EXPIRY_LIMIT_DAYS;
    };
    match raw.to_str().map(str::trim).map(str::parse::<u32>) {
        Some(Ok(limit)) => limit,
        _ => {
            tracing::warn!(
                target = "nova.dir_expiry",
                env = EXPIRY_LIMIT_ENV,
                value = ?raw,
                default = DEFAULT_EXPIRY_LIMIT_DAYS,
                "ignoring invalid expiry limit"
            );
            DEFAULT_EXPIRY_LIMIT_DAYS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_limit_wins() {
        assert_eq!(resolve_limit(Some(7)), 7);
    }

    #[test]
    fn parse_limit_falls_back_to_default() {
        assert_eq!(parse_limit(None), DEFAULT_EXPIRY_LIMIT_DAYS);
        assert_eq!(parse_limit(Some(OsStr::new("soon"))), DEFAULT_EXPIRY_LIMIT_DAYS);
        assert_eq!(parse_limit(Some(OsStr::new("-3"))), DEFAULT_EXPIRY_LIMIT_DAYS);
    }

    #[test]
    fn parse_limit_accepts_padded_integers() {
        assert_eq!(parse_limit(Some(OsStr::new(" 90\n"))), 90);
    }

    #[test]
    fn limit_or_prefers_explicit_value() {
        let config = ExpiryConfig {
            limit_days: 12,
            ..ExpiryConfig::default()
        };
        assert_eq!(config.limit_or(None), 12);
        assert_eq!(config.limit_or(Some(3)), 3);
    }
}
