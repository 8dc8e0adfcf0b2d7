use crate::config::ExpiryConfig;
use crate::error::{ExpiryError, Result};
// Always called as `FileExt::..`: `File` has inherent lock methods with other signatures.
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARNING_AFTER: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory locking keyed by the path being protected.
///
/// Implementations decide where the lock resource lives; callers only ever name the
/// directory (or record file) they want to protect.
pub trait Locker {
    type Guard;

    /// Block until `path` is locked in `mode`.
    fn acquire(&self, path: &Path, mode: LockMode) -> Result<Self::Guard>;

    fn acquire_shared(&self, path: &Path) -> Result<Self::Guard> {
        self.acquire(path, LockMode::Shared)
    }

    fn acquire_exclusive(&self, path: &Path) -> Result<Self::Guard> {
        self.acquire(path, LockMode::Exclusive)
    }

    /// Lock `path` in `mode` only if no other holder blocks it; `Ok(None)` otherwise.
    fn try_acquire(&self, path: &Path, mode: LockMode) -> Result<Option<Self::Guard>>;

    /// Unlock `guard`. When `clear_artifact` is set the lock artifact is deleted once the
    /// unlock has succeeded.
    fn release(&self, guard: Self::Guard, clear_artifact: bool) -> Result<()>;

    /// Delete the lock artifact associated with `path`, if any.
    fn remove_artifact(&self, path: &Path) -> Result<()>;
}

/// [`Locker`] backed by `fs2` file locks on `<path><lock-suffix>` files.
#[derive(Clone, Debug)]
pub struct FileLocker {
    suffix: String,
    timeout: Option<Duration>,
}

impl FileLocker {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ExpiryConfig) -> Self {
        Self {
            suffix: config.lock_suffix.clone(),
            timeout: config.lock_timeout,
        }
    }

    /// Give up with [`ExpiryError::LockTimeout`] instead of blocking forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Path of the lock file guarding `path`.
    pub fn artifact_path(&self, path: &Path) -> PathBuf {
        lock_artifact_path(path, &self.suffix)
    }
}

impl Locker for FileLocker {
    type Guard = FileLock;

    fn acquire(&self, path: &Path, mode: LockMode) -> Result<FileLock> {
        let artifact = self.artifact_path(path);
        match self.timeout {
            None => FileLock::acquire_blocking(artifact, mode),
            Some(timeout) => FileLock::acquire_with_timeout(artifact, mode, timeout),
        }
    }

    fn try_acquire(&self, path: &Path, mode: LockMode) -> Result<Option<FileLock>> {
        FileLock::try_acquire(self.artifact_path(path), mode)
    }

    fn release(&self, guard: FileLock, clear_artifact: bool) -> Result<()> {
        let artifact = guard.artifact.clone();
        guard.unlock()?;
        if clear_artifact {
            remove_lock_file(&artifact)?;
        }
        Ok(())
    }

    fn remove_artifact(&self, path: &Path) -> Result<()> {
        remove_lock_file(&self.artifact_path(path))
    }
}

/// A held advisory lock. Dropping it unlocks but leaves the lock file in place.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    artifact: PathBuf,
    mode: LockMode,
    // `fs2` locks are taken per open file description, which does not reliably exclude
    // other threads of this process across platforms. The in-process guard provides that.
    _guard: ProcessGuard,
}

#[derive(Debug)]
enum ProcessGuard {
    Shared(#[allow(dead_code)] RwLockReadGuard<'static, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'static, ()>),
}

impl FileLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    fn acquire_blocking(artifact: PathBuf, mode: LockMode) -> Result<Self> {
        let rwlock = process_lock_for_path(&artifact);
        let guard = match mode {
            LockMode::Shared => ProcessGuard::Shared(
                rwlock
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            ),
            LockMode::Exclusive => ProcessGuard::Exclusive(
                rwlock
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            ),
        };

        let file = open_lock_file(&artifact)?;
        match try_lock_file(&file, mode) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    target = "nova.dir_expiry",
                    path = %artifact.display(),
                    ?mode,
                    "lock held by another process; waiting"
                );
                let locked = match mode {
                    LockMode::Shared => FileExt::lock_shared(&file),
                    LockMode::Exclusive => FileExt::lock_exclusive(&file),
                };
                locked.map_err(|source| ExpiryError::Lock {
                    path: artifact.clone(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ExpiryError::Lock {
                    path: artifact,
                    source,
                })
            }
        }

        Ok(Self {
            file,
            artifact,
            mode,
            _guard: guard,
        })
    }

    fn acquire_with_timeout(artifact: PathBuf, mode: LockMode, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        let mut warned = false;
        let mut wait = |artifact: &Path| -> Result<()> {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ExpiryError::LockTimeout {
                    path: artifact.to_path_buf(),
                    timeout,
                });
            }
            if !warned && elapsed > CONTENTION_WARNING_AFTER {
                warned = true;
                tracing::warn!(
                    target = "nova.dir_expiry",
                    path = %artifact.display(),
                    ?mode,
                    "lock contention; waiting"
                );
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(elapsed)));
            Ok(())
        };

        let rwlock = process_lock_for_path(&artifact);
        let guard = loop {
            match try_process_guard(rwlock, mode) {
                Some(guard) => break guard,
                None => wait(&artifact)?,
            }
        };

        let file = open_lock_file(&artifact)?;
        loop {
            match try_lock_file(&file, mode) {
                Ok(true) => break,
                Ok(false) => wait(&artifact)?,
                Err(source) => {
                    return Err(ExpiryError::Lock {
                        path: artifact,
                        source,
                    })
                }
            }
        }

        if warned {
            tracing::info!(
                target = "nova.dir_expiry",
                path = %artifact.display(),
                waited_ms = start.elapsed().as_millis() as u64,
                "lock acquired after contention"
            );
        }

        Ok(Self {
            file,
            artifact,
            mode,
            _guard: guard,
        })
    }

    fn try_acquire(artifact: PathBuf, mode: LockMode) -> Result<Option<Self>> {
        let Some(guard) = try_process_guard(process_lock_for_path(&artifact), mode) else {
            return Ok(None);
        };

        let file = open_lock_file(&artifact)?;
        match try_lock_file(&file, mode) {
            Ok(true) => Ok(Some(Self {
                file,
                artifact,
                mode,
                _guard: guard,
            })),
            Ok(false) => Ok(None),
            Err(source) => Err(ExpiryError::Lock {
                path: artifact,
                source,
            }),
        }
    }

    fn unlock(self) -> Result<()> {
        FileExt::unlock(&self.file).map_err(|source| ExpiryError::Lock {
            path: self.artifact.clone(),
            source,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn lock_artifact_path(path: &Path, suffix: &str) -> PathBuf {
    // Normalize away trailing separators so the suffix lands on the final component.
    let normalized: PathBuf = path.components().collect();
    let mut name = normalized.into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn open_lock_file(artifact: &Path) -> Result<File> {
    if let Some(parent) = artifact.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| ExpiryError::io_at(parent, err))?;
        }
    }

    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(artifact)
        .map_err(|source| ExpiryError::Lock {
            path: artifact.to_path_buf(),
            source,
        })
}

fn try_process_guard(rwlock: &'static RwLock<()>, mode: LockMode) -> Option<ProcessGuard> {
    match mode {
        LockMode::Shared => match rwlock.try_read() {
            Ok(guard) => Some(ProcessGuard::Shared(guard)),
            Err(TryLockError::Poisoned(poisoned)) => Some(ProcessGuard::Shared(poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        },
        LockMode::Exclusive => match rwlock.try_write() {
            Ok(guard) => Some(ProcessGuard::Exclusive(guard)),
            Err(TryLockError::Poisoned(poisoned)) => {
                Some(ProcessGuard::Exclusive(poisoned.into_inner()))
            }
            Err(TryLockError::WouldBlock) => None,
        },
    }
}

/// Returns `Ok(false)` when another holder currently blocks the lock.
fn try_lock_file(file: &File, mode: LockMode) -> io::Result<bool> {
    let attempt = match mode {
        LockMode::Shared => FileExt::try_lock_shared(file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(file),
    };
    match attempt {
        Ok(()) => Ok(true),
        Err(err) if is_contended(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn remove_lock_file(artifact: &Path) -> Result<()> {
    match std::fs::remove_file(artifact) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ExpiryError::Remove {
            path: artifact.to_path_buf(),
            source,
        }),
    }
}

fn process_lock_for_path(path: &Path) -> &'static RwLock<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static RwLock<()>>>> =
        OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let rwlock: &'static RwLock<()> = Box::leak(Box::new(RwLock::new(())));
    map.insert(path.to_path_buf(), rwlock);
    rwlock
}
