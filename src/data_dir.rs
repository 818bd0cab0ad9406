use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Name of the state directory created inside the watched directory.
pub const DATA_DIR_NAME: &str = ".tdfwatch";

/// Manages the `.tdfwatch/` directory layout.
///
/// Watcher bookkeeping lives under a single directory inside the watch root.
/// Its name does not end in `.d`, so it is never a conversion candidate.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory for a given watch directory.
    pub fn for_watch_dir(watch_dir: &Path) -> Self {
        Self::new(watch_dir.join(DATA_DIR_NAME))
    }

    /// The root directory (e.g. `.tdfwatch/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the watcher status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Create the directory if missing.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }

    /// Take the exclusive watcher lock for this directory.
    ///
    /// The lock is held for as long as the returned guard lives.
    pub fn acquire_lock(&self) -> Result<WatcherLock, LockError> {
        let path = self.lock();
        let file = File::create(&path).map_err(|e| LockError::Open {
            path: path.clone(),
            source: e,
        })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(WatcherLock { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::Held { path })
            }
            Err(e) => Err(LockError::Open { path, source: e }),
        }
    }
}

/// Held exclusive lock on `.tdfwatch/lock`.
#[derive(Debug)]
pub struct WatcherLock {
    file: File,
    path: PathBuf,
}

impl WatcherLock {
    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatcherLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Errors from taking the watcher lock.
#[derive(Debug)]
pub enum LockError {
    /// Another process already holds the lock.
    Held { path: PathBuf },
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Held { path } => write!(
                f,
                "another watcher is already running on this directory (lock {})",
                path.display()
            ),
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Held { .. } => None,
            LockError::Open { source, .. } => Some(source),
        }
    }
}
