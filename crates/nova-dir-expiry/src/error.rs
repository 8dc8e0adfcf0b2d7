use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ExpiryError>;

/// Errors produced while touching, locking or clearing versioned cache directories.
#[derive(Debug, thiserror::Error)]
pub enum ExpiryError {
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("invalid access record {path}: {message}")]
    InvalidRecord { path: PathBuf, message: String },

    #[error("path {path} does not name a versioned directory")]
    InvalidPath { path: PathBuf },

    #[error("invalid version {value:?}")]
    InvalidVersion { value: String },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExpiryError {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_message_names_the_path() {
        let err = ExpiryError::LockTimeout {
            path: PathBuf::from("/cache/1.0.0"),
            timeout: Duration::from_millis(100),
        };
        let message = err.to_string();
        assert!(message.contains("/cache/1.0.0"), "{message}");
        assert!(message.contains("100ms"), "{message}");
    }
}
